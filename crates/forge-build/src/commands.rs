//! Package-manager detection and install/build command rendering.

use std::fmt;
use std::path::Path;

use forge_protocol::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

/// Script run by the build step.
pub const BUILD_SCRIPT: &str = "build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn program(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
        }
    }

    pub fn install(self) -> CommandLine {
        CommandLine::new(format!("{} install", self.program()))
    }

    pub fn run_script(self, script: &str) -> CommandLine {
        CommandLine::new(format!("{} run {script}", self.program()))
    }
}

/// A command rendered as one shell string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandLine(String);

impl CommandLine {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed `install` then `build` pipeline for one directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCommands {
    pub manager: Option<PackageManager>,
    pub install: CommandLine,
    pub build: CommandLine,
}

impl BuildCommands {
    /// Explicit commands, bypassing `package.json`.
    pub fn custom(install: impl Into<String>, build: impl Into<String>) -> Self {
        Self {
            manager: None,
            install: CommandLine::new(install),
            build: CommandLine::new(build),
        }
    }

    pub fn steps(&self) -> [(&'static str, &CommandLine); 2] {
        [("install", &self.install), ("build", &self.build)]
    }
}

/// `yarn.lock` selects yarn, `pnpm-lock.yaml` selects pnpm, anything else npm.
pub async fn detect_package_manager(dir: &Path) -> PackageManager {
    if fs::try_exists(dir.join("yarn.lock")).await.unwrap_or(false) {
        PackageManager::Yarn
    } else if fs::try_exists(dir.join("pnpm-lock.yaml")).await.unwrap_or(false) {
        PackageManager::Pnpm
    } else {
        PackageManager::Npm
    }
}

pub async fn build_commands(dir: &Path) -> ForgeResult<BuildCommands> {
    let manifest_path = dir.join("package.json");
    let raw = fs::read_to_string(&manifest_path).await.map_err(|error| {
        ForgeError::UnsupportedProject(format!("{}: {error}", manifest_path.display()))
    })?;
    let manifest: serde_json::Value = serde_json::from_str(&raw).map_err(|error| {
        ForgeError::UnsupportedProject(format!("{}: {error}", manifest_path.display()))
    })?;

    let declared = manifest
        .get("scripts")
        .and_then(|scripts| scripts.get(BUILD_SCRIPT))
        .is_some();
    if !declared {
        warn!(dir = %dir.display(), "package.json declares no build script; running `build` anyway");
    }

    let manager = detect_package_manager(dir).await;
    debug!(manager = manager.program(), "build commands resolved");
    Ok(BuildCommands {
        manager: Some(manager),
        install: manager.install(),
        build: manager.run_script(BUILD_SCRIPT),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use forge_protocol::ForgeError;
    use tokio::fs;

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn lockfiles_select_the_manager() -> Result<()> {
        let root = unique_test_root("forge-build-detect");
        fs::create_dir_all(&root).await?;
        assert_eq!(detect_package_manager(&root).await, PackageManager::Npm);

        fs::write(root.join("pnpm-lock.yaml"), "").await?;
        assert_eq!(detect_package_manager(&root).await, PackageManager::Pnpm);

        fs::write(root.join("yarn.lock"), "").await?;
        assert_eq!(detect_package_manager(&root).await, PackageManager::Yarn);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn commands_render_for_the_detected_manager() -> Result<()> {
        let root = unique_test_root("forge-build-commands");
        fs::create_dir_all(&root).await?;
        fs::write(root.join("package.json"), r#"{"scripts":{"build":"vite build"}}"#).await?;
        fs::write(root.join("yarn.lock"), "").await?;

        let commands = build_commands(&root).await?;
        assert_eq!(commands.manager, Some(PackageManager::Yarn));
        assert_eq!(commands.install.as_str(), "yarn install");
        assert_eq!(commands.build.as_str(), "yarn run build");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn missing_or_invalid_manifest_is_unsupported() -> Result<()> {
        let root = unique_test_root("forge-build-unsupported");
        fs::create_dir_all(&root).await?;
        assert!(matches!(
            build_commands(&root).await,
            Err(ForgeError::UnsupportedProject(_))
        ));

        fs::write(root.join("package.json"), "{ not json").await?;
        assert!(matches!(
            build_commands(&root).await,
            Err(ForgeError::UnsupportedProject(_))
        ));

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
