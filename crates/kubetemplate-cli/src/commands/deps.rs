//! Deps command - show what templates read from the cluster

use std::path::PathBuf;

use kubetemplate_engine::{Dependency, ResourceKind};

use super::{GlobalOptions, connect, load_template};
use crate::error::{CliError, Result};

pub async fn run(
    options: &GlobalOptions,
    templates: &[PathBuf],
    kinds: &[ResourceKind],
    json: bool,
) -> Result<()> {
    let config = options.load_config()?;
    let templates = templates
        .iter()
        .map(|path| load_template(path))
        .collect::<Result<Vec<_>>>()?;

    let engine = connect(&config).await?;
    for template in &templates {
        engine.learn(template).await?;
    }
    let dependencies = filter_kinds(engine.dependencies(), kinds);
    engine.close();

    print!("{}", format_dependencies(&dependencies, json)?);
    Ok(())
}

/// Keep dependencies of the given kinds; no kinds keeps everything
fn filter_kinds(dependencies: Vec<Dependency>, kinds: &[ResourceKind]) -> Vec<Dependency> {
    if kinds.is_empty() {
        return dependencies;
    }
    dependencies
        .into_iter()
        .filter(|dep| kinds.contains(&dep.kind))
        .collect()
}

fn format_dependencies(dependencies: &[Dependency], json: bool) -> Result<String> {
    if json {
        let mut out = serde_json::to_string_pretty(dependencies)
            .map_err(|e| CliError::internal(e.to_string()))?;
        out.push('\n');
        Ok(out)
    } else {
        serde_yaml::to_string(dependencies).map_err(|e| CliError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Dependency> {
        vec![
            Dependency {
                namespace: "voice".into(),
                kind: ResourceKind::ConfigMap,
                name: "asterisk".into(),
                keys: vec!["pjsip".into()],
            },
            Dependency {
                namespace: "voice".into(),
                kind: ResourceKind::Endpoints,
                name: "kamailio".into(),
                keys: vec![],
            },
        ]
    }

    #[test]
    fn test_format_yaml() {
        let out = format_dependencies(&sample(), false).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(parsed[0]["name"].as_str(), Some("asterisk"));
        assert_eq!(parsed[0]["keys"][0].as_str(), Some("pjsip"));
        assert!(parsed[1].get("keys").is_none());
    }

    #[test]
    fn test_format_json() {
        let out = format_dependencies(&sample(), true).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[1]["namespace"], "voice");
    }

    #[test]
    fn test_filter_kinds() {
        let all = filter_kinds(sample(), &[]);
        assert_eq!(all.len(), 2);

        let endpoints = filter_kinds(sample(), &[ResourceKind::Endpoints]);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].name, "kamailio");

        assert!(filter_kinds(sample(), &[ResourceKind::Secret]).is_empty());
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_dependencies(&[], true).unwrap(), "[]\n");
    }
}
