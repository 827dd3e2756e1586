//! Watch command - keep output files current and reload on change

use std::path::PathBuf;

use kubetemplate_engine::{CancellationToken, Engine, EngineError, LookupError, Template};
use tokio::process::Command;
use tracing::{error, info, warn};

use super::{GlobalOptions, connect, load_template, write_atomic};
use crate::config::TemplatePair;
use crate::error::{CliError, Result};

/// A template and the file it keeps current
#[derive(Debug)]
pub struct Job {
    template: Template,
    output: PathBuf,
    last: Option<String>,
}

impl Job {
    /// Load the template; an existing output counts as the last render
    pub fn load(pair: &TemplatePair) -> Result<Self> {
        Ok(Self {
            template: load_template(&pair.source)?,
            output: pair.output.clone(),
            last: std::fs::read_to_string(&pair.output).ok(),
        })
    }

    /// Write `rendered` if it differs from the last written content
    fn update(&mut self, rendered: String) -> Result<bool> {
        if self.last.as_deref() == Some(rendered.as_str()) {
            return Ok(false);
        }
        write_atomic(&self.output, &rendered)?;
        info!(output = %self.output.display(), bytes = rendered.len(), "updated output");
        self.last = Some(rendered);
        Ok(true)
    }
}

pub async fn run(
    options: &GlobalOptions,
    pairs: &[TemplatePair],
    reload_cmd: Option<Vec<String>>,
) -> Result<()> {
    let config = options.load_config()?;
    let pairs = if pairs.is_empty() {
        config.templates.clone()
    } else {
        pairs.to_vec()
    };
    if pairs.is_empty() {
        return Err(CliError::usage(
            "no templates to watch; pass -t SOURCE:OUTPUT or list them under `templates` in the configuration file",
        ));
    }
    let reload = reload_cmd
        .or_else(|| config.reload.as_ref().map(|r| r.command.clone()))
        .filter(|argv| !argv.is_empty());

    let mut jobs = pairs.iter().map(Job::load).collect::<Result<Vec<_>>>()?;

    let engine = connect(&config).await?;
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        interrupt.cancel();
    });

    let result = watch_loop(&engine, &mut jobs, reload.as_deref(), &cancel).await;
    engine.close();
    result
}

/// Learn every template, then render on each change until `cancel` fires
pub async fn watch_loop(
    engine: &Engine,
    jobs: &mut [Job],
    reload: Option<&[String]>,
    cancel: &CancellationToken,
) -> Result<()> {
    for job in jobs.iter() {
        engine.learn(&job.template).await?;
    }
    info!(
        templates = jobs.len(),
        dependencies = engine.dependencies().len(),
        "watching"
    );

    let mut first = true;
    loop {
        engine.check_health()?;

        let mut changed = false;
        for job in jobs.iter_mut() {
            match engine.render(&job.template).await {
                Ok(rendered) => changed |= job.update(rendered)?,
                // The missing resource is watched; its arrival triggers another pass
                Err(EngineError::Lookup(e)) if !matches!(e, LookupError::CacheNotSynced { .. }) => {
                    error!(template = job.template.name(), error = %e, "render failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if changed && !first {
            if let Some(argv) = reload {
                run_reload(argv).await?;
            }
        }
        first = false;

        engine.wait(cancel).await;
        if cancel.is_cancelled() {
            info!("stopping");
            return Ok(());
        }
    }
}

async fn run_reload(argv: &[String]) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    info!(command = ?argv, "running reload command");
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|e| CliError::Io {
            message: format!("failed to run reload command '{}': {}", program, e),
        })?;
    if !status.success() {
        warn!(command = ?argv, %status, "reload command failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kubetemplate_engine::{MockControlPlane, StaticDiscoverer};
    use std::path::Path;
    use std::time::Duration;

    fn config_map(level: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("app-cfg".into()),
                namespace: Some("voice".into()),
                ..Default::default()
            },
            data: Some([("LOG_LEVEL".to_string(), level.to_string())].into()),
            ..Default::default()
        }
    }

    fn engine(mock: &MockControlPlane) -> Engine {
        Engine::builder(mock.clone())
            .discoverer(StaticDiscoverer::new().with_hostname("media-0"))
            .default_namespace("voice")
            .resync(Duration::ZERO)
            .build()
            .unwrap()
    }

    fn job(dir: &Path, source: &str) -> Job {
        let pair = TemplatePair {
            source: dir.join("app.conf.j2"),
            output: dir.join("app.conf"),
        };
        std::fs::write(&pair.source, source).unwrap();
        Job::load(&pair).unwrap()
    }

    async fn eventually(what: impl Fn() -> bool) {
        for _ in 0..100 {
            if what() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_job_skips_identical_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.conf"), "level=info").unwrap();
        let mut job = job(dir.path(), "{{ 1 }}");

        assert!(!job.update("level=info".into()).unwrap());
        assert!(job.update("level=debug".into()).unwrap());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.conf")).unwrap(),
            "level=debug"
        );
    }

    #[tokio::test]
    async fn test_watch_loop_rewrites_and_reloads() {
        let mock = MockControlPlane::new();
        mock.apply(config_map("info")).unwrap();
        let engine = engine(&mock);

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("app.conf");
        let marker = dir.path().join("reloaded");
        let mut jobs = vec![job(
            dir.path(),
            r#"level={{ kube.config_map("app-cfg", "", "LOG_LEVEL") }}"#,
        )];
        let reload = vec!["touch".to_string(), marker.display().to_string()];
        let cancel = CancellationToken::new();

        let driver = async {
            eventually(|| output.exists()).await;
            assert_eq!(std::fs::read_to_string(&output).unwrap(), "level=info");
            assert!(!marker.exists());

            mock.apply(config_map("debug")).unwrap();
            eventually(|| marker.exists()).await;
            assert_eq!(std::fs::read_to_string(&output).unwrap(), "level=debug");
            cancel.cancel();
        };

        let (result, ()) = tokio::join!(
            watch_loop(&engine, &mut jobs, Some(&reload), &cancel),
            driver
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn test_watch_loop_waits_for_missing_secret() {
        let mock = MockControlPlane::new();
        let engine = engine(&mock);

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("app.conf");
        let mut jobs = vec![job(
            dir.path(),
            r#"key={{ kube.secret_binary("tls", "", "tls.key") | b64encode }}"#,
        )];
        let cancel = CancellationToken::new();

        let driver = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!output.exists());

            mock.apply(Secret {
                metadata: ObjectMeta {
                    name: Some("tls".into()),
                    namespace: Some("voice".into()),
                    ..Default::default()
                },
                data: Some([("tls.key".to_string(), ByteString(b"pem".to_vec()))].into()),
                ..Default::default()
            })
            .unwrap();
            eventually(|| output.exists()).await;
            assert_eq!(std::fs::read_to_string(&output).unwrap(), "key=cGVt");
            cancel.cancel();
        };

        let (result, ()) = tokio::join!(
            watch_loop(&engine, &mut jobs, None, &cancel),
            driver
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn test_watch_loop_exits_on_watch_failure() {
        let mock = MockControlPlane::new();
        mock.apply(config_map("info")).unwrap();
        let engine = engine(&mock);

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("app.conf");
        let mut jobs = vec![job(
            dir.path(),
            r#"{{ kube.config_map("app-cfg", "", "LOG_LEVEL") }}"#,
        )];
        let cancel = CancellationToken::new();

        let driver = async {
            eventually(|| output.exists()).await;
            mock.fail::<ConfigMap>("voice", "connection reset");
        };

        let (result, ()) = tokio::join!(
            tokio::time::timeout(
                Duration::from_secs(5),
                watch_loop(&engine, &mut jobs, None, &cancel)
            ),
            driver
        );
        let err = result.expect("loop should stop").unwrap_err();
        assert!(matches!(err, CliError::WatchFailure { .. }));
    }

    #[tokio::test]
    async fn test_run_reload_reports_spawn_failure() {
        let err = run_reload(&["/nonexistent/reload-me".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
        run_reload(&[]).await.unwrap();
    }
}
