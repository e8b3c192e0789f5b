//! JSON manifest accepted by `runnerscaled apply`.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use runnerscale_state::{HorizontalRunnerAutoscaler, RunnerDeployment};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    pub autoscalers: Vec<HorizontalRunnerAutoscaler>,
    pub deployments: Vec<RunnerDeployment>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("parsing manifest {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let manifest: Self = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let metas = self
            .autoscalers
            .iter()
            .map(|hra| &hra.metadata)
            .chain(self.deployments.iter().map(|rd| &rd.metadata));
        for meta in metas {
            if meta.namespace.is_empty() || meta.name.is_empty() {
                anyhow::bail!("resource {:?} needs both a namespace and a name", meta.key());
            }
        }
        for hra in &self.autoscalers {
            if hra.spec.scale_target_ref.name.is_empty() {
                anyhow::bail!("autoscaler {} has no scaleTargetRef.name", hra.table_key());
            }
            if let (Some(min), Some(max)) = (hra.spec.min_replicas, hra.spec.max_replicas)
                && min > max
            {
                anyhow::bail!(
                    "autoscaler {}: minReplicas {min} exceeds maxReplicas {max}",
                    hra.table_key()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runnerscale_state::MetricSpec;

    const SAMPLE: &str = r#"{
        "autoscalers": [{
            "metadata": {"namespace": "ci", "name": "hra"},
            "spec": {
                "scaleTargetRef": {"name": "runners"},
                "minReplicas": 1,
                "maxReplicas": 10,
                "scaleDownDelaySecondsAfterScaleUp": 300,
                "metrics": [{"type": "TotalNumberOfQueuedAndInProgressWorkflowRuns"}]
            }
        }],
        "deployments": [{
            "metadata": {"namespace": "ci", "name": "runners"},
            "spec": {"repository": "acme/app", "labels": ["linux"]}
        }]
    }"#;

    #[test]
    fn parses_sample_manifest() {
        let manifest = Manifest::from_json(SAMPLE).unwrap();
        assert_eq!(manifest.autoscalers.len(), 1);
        assert_eq!(manifest.deployments.len(), 1);

        let hra = &manifest.autoscalers[0];
        assert_eq!(hra.target_key(), "ci/runners");
        assert_eq!(hra.spec.scale_down_delay_seconds_after_scale_up, Some(300));
        assert_eq!(
            hra.spec.metrics,
            vec![MetricSpec::TotalNumberOfQueuedAndInProgressWorkflowRuns]
        );
        assert!(hra.status.cache_entries.is_empty());

        let rd = &manifest.deployments[0];
        assert_eq!(rd.spec.replicas, None);
        assert_eq!(rd.spec.repository.as_deref(), Some("acme/app"));
    }

    #[test]
    fn empty_manifest_is_valid() {
        let manifest = Manifest::from_json("{}").unwrap();
        assert!(manifest.autoscalers.is_empty());
        assert!(manifest.deployments.is_empty());
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(Manifest::from_json(r#"{"pods": []}"#).is_err());
    }

    #[test]
    fn rejects_missing_target() {
        let json = r#"{"autoscalers": [{
            "metadata": {"namespace": "ci", "name": "hra"},
            "spec": {"scaleTargetRef": {"name": ""}}
        }]}"#;
        let err = Manifest::from_json(json).unwrap_err();
        assert!(err.to_string().contains("scaleTargetRef"));
    }

    #[test]
    fn rejects_inverted_bounds() {
        let json = r#"{"autoscalers": [{
            "metadata": {"namespace": "ci", "name": "hra"},
            "spec": {"scaleTargetRef": {"name": "runners"}, "minReplicas": 5, "maxReplicas": 2}
        }]}"#;
        assert!(Manifest::from_json(json).is_err());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(Manifest::from_file(&path).unwrap().autoscalers.len(), 1);
    }
}
