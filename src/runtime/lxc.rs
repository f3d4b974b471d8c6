//! LXC runtime backend.
//!
//! Drives containers through the `lxc-*` command-line tools using
//! `tokio::process::Command`, scoped to a single `lxcpath`.

use super::{ContainerRuntime, RuntimeError};
use crate::container::TemplateSpec;
use crate::env;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Template options understood by `lxc-create`.
///
/// Field names follow the LXC template option names; snake_case aliases are
/// accepted as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LxcTemplate {
    /// Template script name (`download`, `busybox`, ...)
    #[serde(alias = "template")]
    pub template: Option<String>,
    #[serde(alias = "distro")]
    pub distro: Option<String>,
    #[serde(alias = "release")]
    pub release: Option<String>,
    #[serde(alias = "arch")]
    pub arch: Option<String>,
    #[serde(alias = "variant")]
    pub variant: Option<String>,
    /// Image server for the download template
    #[serde(alias = "server")]
    pub server: Option<String>,
    #[serde(rename = "KeyID", alias = "key_id")]
    pub key_id: Option<String>,
    #[serde(alias = "key_server")]
    pub key_server: Option<String>,
    #[serde(rename = "DisableGPGValidation", alias = "disable_gpg_validation")]
    pub disable_gpg_validation: bool,
    #[serde(alias = "flush_cache")]
    pub flush_cache: bool,
    #[serde(alias = "force_cache")]
    pub force_cache: bool,
    /// Backing store (`dir`, `btrfs`, `zfs`, ...)
    #[serde(alias = "backend")]
    pub backend: Option<String>,
    /// Arguments appended verbatim after the template options
    #[serde(alias = "extra_args")]
    pub extra_args: Vec<String>,
}

impl LxcTemplate {
    /// Decode the LXC options out of an opaque template.
    pub fn from_spec(template: &TemplateSpec) -> Result<Self, RuntimeError> {
        template
            .decode()
            .map_err(|e| RuntimeError::InvalidTemplate(e.to_string()))
    }

    /// Template script name, falling back to the download template.
    pub fn template_name(&self) -> &str {
        self.template
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(env::runtime::DEFAULT_LXC_TEMPLATE)
    }

    /// Arguments passed to the template script (after `--`).
    ///
    /// # Errors
    ///
    /// The download template needs a distro, release and arch; without them
    /// it would prompt interactively.
    pub fn template_args(&self) -> Result<Vec<String>, RuntimeError> {
        let mut args = Vec::new();

        if self.template_name() == env::runtime::DEFAULT_LXC_TEMPLATE {
            let (Some(distro), Some(release), Some(arch)) =
                (&self.distro, &self.release, &self.arch)
            else {
                return Err(RuntimeError::InvalidTemplate(
                    "the download template requires Distro, Release and Arch".to_string(),
                ));
            };

            args.extend(["--dist".to_string(), distro.clone()]);
            args.extend(["--release".to_string(), release.clone()]);
            args.extend(["--arch".to_string(), arch.clone()]);

            let optional = [
                ("--variant", &self.variant),
                ("--server", &self.server),
                ("--keyid", &self.key_id),
                ("--keyserver", &self.key_server),
            ];
            for (flag, value) in optional {
                if let Some(value) = value {
                    args.extend([flag.to_string(), value.clone()]);
                }
            }

            if self.disable_gpg_validation {
                args.push("--no-validate".to_string());
            }
            if self.force_cache {
                args.push("--force-cache".to_string());
            }
        } else {
            if let Some(release) = &self.release {
                args.extend(["--release".to_string(), release.clone()]);
            }
            if let Some(arch) = &self.arch {
                args.extend(["--arch".to_string(), arch.clone()]);
            }
        }

        if self.flush_cache {
            args.push("--flush-cache".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        Ok(args)
    }
}

/// Runtime backed by the `lxc-*` tools.
#[derive(Debug, Clone)]
pub struct LxcRuntime {
    lxcpath: PathBuf,
    stop_timeout_secs: u64,
}

impl LxcRuntime {
    /// Create a runtime managing containers under `lxcpath`.
    pub fn new(lxcpath: impl Into<PathBuf>, stop_timeout_secs: u64) -> Self {
        Self {
            lxcpath: lxcpath.into(),
            stop_timeout_secs,
        }
    }

    /// Container path this runtime manages.
    pub fn lxcpath(&self) -> &Path {
        &self.lxcpath
    }

    fn path_arg(&self) -> String {
        self.lxcpath.display().to_string()
    }

    /// Full argument list for `lxc-create`.
    pub fn create_args(&self, name: &str, template: &LxcTemplate) -> Result<Vec<String>, RuntimeError> {
        let mut args = vec![
            "-n".to_string(),
            name.to_string(),
            "-P".to_string(),
            self.path_arg(),
            "-t".to_string(),
            template.template_name().to_string(),
        ];

        if let Some(backend) = &template.backend {
            args.extend(["-B".to_string(), backend.clone()]);
        }

        let template_args = template.template_args()?;
        if !template_args.is_empty() {
            args.push("--".to_string());
            args.extend(template_args);
        }

        Ok(args)
    }

    fn name_args(&self, name: &str) -> Vec<String> {
        vec![
            "-n".to_string(),
            name.to_string(),
            "-P".to_string(),
            self.path_arg(),
        ]
    }

    /// Check that every LXC tool this backend needs is on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Unavailable`] naming the first missing tool.
    pub fn check_required_tools(&self) -> Result<(), RuntimeError> {
        for tool in env::runtime::LXC_TOOLS {
            if which::which(tool).is_err() {
                return Err(RuntimeError::Unavailable(format!("{} not found in PATH", tool)));
            }
        }
        Ok(())
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<String, RuntimeError> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!("Running {}", command_line);

        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RuntimeError::Unavailable(format!("{} not found in PATH", program))
                }
                _ => RuntimeError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::CommandFailed {
                command: command_line,
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ContainerRuntime for LxcRuntime {
    fn validate_template(&self, template: &TemplateSpec) -> Result<(), RuntimeError> {
        LxcTemplate::from_spec(template)?.template_args().map(|_| ())
    }

    async fn create(&self, name: &str, template: &TemplateSpec) -> Result<(), RuntimeError> {
        let options = LxcTemplate::from_spec(template)?;
        let args = self.create_args(name, &options)?;
        self.run("lxc-create", args).await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.run("lxc-start", self.name_args(name)).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let mut args = self.name_args(name);
        args.extend(["-t".to_string(), self.stop_timeout_secs.to_string()]);
        self.run("lxc-stop", args).await?;
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeError> {
        self.run("lxc-destroy", self.name_args(name)).await?;
        Ok(())
    }

    async fn list_names(&self) -> Result<Vec<String>, RuntimeError> {
        let stdout = self
            .run("lxc-ls", vec!["-P".to_string(), self.path_arg(), "-1".to_string()])
            .await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    async fn version(&self) -> Result<String, RuntimeError> {
        let stdout = self.run("lxc-create", vec!["--version".to_string()]).await?;
        Ok(stdout.trim().to_string())
    }

    async fn health_check(&self) -> Result<(), RuntimeError> {
        self.check_required_tools()?;
        let lxcpath = self.lxcpath();
        if !lxcpath.is_dir() {
            return Err(RuntimeError::Unavailable(format!(
                "lxcpath {} is not a directory",
                lxcpath.display()
            )));
        }
        self.version().await.map(|_| ())
    }

    fn runtime_type(&self) -> &'static str {
        "lxc"
    }
}
