use crate::{
    core::TemplateRef,
    k8s::{NetworkPolicy, ResourceExt},
    reconcile::Templates,
};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Reads network policy templates from a multi-document YAML file.
pub fn load(path: &Path) -> Result<Templates> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read templates from {}", path.display()))?;
    parse(&yaml).with_context(|| format!("invalid templates in {}", path.display()))
}

pub fn parse(yaml: &str) -> Result<Templates> {
    let mut templates = Templates::new();
    for doc in serde_yaml::Deserializer::from_str(yaml) {
        let policy = match Option::<NetworkPolicy>::deserialize(doc)? {
            Some(policy) => policy,
            None => continue,
        };

        let name = match policy.metadata.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => bail!("network policy template must have a name"),
        };
        let ns = match policy.namespace() {
            Some(ns) if !ns.is_empty() => ns,
            _ => bail!("network policy template {name} must have a namespace"),
        };

        let tref = TemplateRef::new(ns, name);
        if templates.contains_key(&tref) {
            bail!("duplicate network policy template {tref}");
        }
        templates.insert(tref, policy);
    }
    Ok(templates)
}
