//! Image Resolver
//!
//! Extracts every runtime container image a compiled output will use, from the
//! pipeline spec and, when present, the platform spec.

use std::collections::BTreeSet;

use serde_yaml::{Mapping, Value};

use crate::compiler::CompiledOutput;

/// All resolved images in a compiled output.
pub fn extract_images(output: &CompiledOutput) -> BTreeSet<String> {
    match output {
        CompiledOutput::Single(doc) => images_from_pipeline_spec(doc),
        CompiledOutput::Pair { pipeline_spec, platform_spec } => {
            let mut images = images_from_pipeline_spec(pipeline_spec);
            images.extend(images_from_platform_spec(platform_spec));
            images
        }
    }
}

/// Images from `deploymentSpec.executors`, `root.dag.tasks.*.componentRef.image`
/// and executors referenced by `components.*.executorLabel`.
pub fn images_from_pipeline_spec(spec: &Mapping) -> BTreeSet<String> {
    let executors = mapping_at(spec, &["deploymentSpec", "executors"]);
    let mut images = executors.map(images_from_executors).unwrap_or_default();

    if let Some(tasks) = mapping_at(spec, &["root", "dag", "tasks"]) {
        for task in tasks.values() {
            if let Some(image) = as_mapping(task).and_then(|t| string_at(t, &["componentRef", "image"])) {
                images.insert(image.to_string());
            }
        }
    }

    if let (Some(components), Some(executors)) = (mapping_at(spec, &["components"]), executors) {
        for component in components.values() {
            let Some(label) = as_mapping(component).and_then(|c| string_at(c, &["executorLabel"])) else {
                continue;
            };
            if let Some(image) = executors.get(label).and_then(container_image) {
                images.insert(image.to_string());
            }
        }
    }

    images
}

/// Images from `platforms.<name>.deploymentSpec.executors` across all platforms.
pub fn images_from_platform_spec(spec: &Mapping) -> BTreeSet<String> {
    let Some(platforms) = mapping_at(spec, &["platforms"]) else {
        return BTreeSet::new();
    };
    platforms
        .values()
        .filter_map(as_mapping)
        .filter_map(|platform| mapping_at(platform, &["deploymentSpec", "executors"]))
        .flat_map(images_from_executors)
        .collect()
}

fn images_from_executors(executors: &Mapping) -> BTreeSet<String> {
    executors
        .values()
        .filter_map(container_image)
        .map(str::to_string)
        .collect()
}

fn container_image(executor: &Value) -> Option<&str> {
    as_mapping(executor).and_then(|e| string_at(e, &["container", "image"]))
}

fn as_mapping(value: &Value) -> Option<&Mapping> {
    match value {
        Value::Mapping(m) => Some(m),
        _ => None,
    }
}

fn mapping_at<'a>(root: &'a Mapping, path: &[&str]) -> Option<&'a Mapping> {
    let mut current = root;
    for key in path {
        current = as_mapping(current.get(*key)?)?;
    }
    Some(current)
}

/// Non-empty string at `path`.
fn string_at<'a>(root: &'a Mapping, path: &[&str]) -> Option<&'a str> {
    let (last, parents) = path.split_last()?;
    let parent = mapping_at(root, parents)?;
    match parent.get(*last)? {
        Value::String(s) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_pipeline_spec_sources() {
        let spec = doc(r#"
deploymentSpec:
  executors:
    exec-train:
      container:
        image: registry/ns-train:main
    exec-empty:
      container:
        image: ""
    exec-none: {}
root:
  dag:
    tasks:
      direct:
        componentRef:
          image: registry/ns-direct:main
      named:
        componentRef:
          name: comp-train
components:
  comp-train:
    executorLabel: exec-train
  comp-missing:
    executorLabel: exec-gone
"#);
        let images = images_from_pipeline_spec(&spec);
        assert_eq!(
            images.into_iter().collect::<Vec<_>>(),
            vec!["registry/ns-direct:main", "registry/ns-train:main"]
        );
    }

    #[test]
    fn test_platform_spec_all_platforms() {
        let spec = doc(r#"
platforms:
  kubernetes:
    deploymentSpec:
      executors:
        e1:
          container:
            image: img:1
  other:
    deploymentSpec:
      executors:
        e2:
          container:
            image: img:2
  broken: 3
"#);
        let images = images_from_platform_spec(&spec);
        assert_eq!(images.len(), 2);
        assert!(images.contains("img:1") && images.contains("img:2"));
    }

    #[test]
    fn test_primary_only_output() {
        let output = CompiledOutput::Single(doc("root:\n  dag:\n    tasks: {}\n"));
        assert!(extract_images(&output).is_empty());
    }

    #[test]
    fn test_malformed_shapes_are_ignored() {
        let spec = doc("deploymentSpec: [1, 2]\nroot: text\ncomponents: 7\n");
        assert!(images_from_pipeline_spec(&spec).is_empty());
        assert!(images_from_platform_spec(&doc("platforms: [a]\n")).is_empty());
    }
}
