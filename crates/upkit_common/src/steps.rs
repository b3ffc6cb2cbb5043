//! Step actions
//!
//! Each action checks that its tool is present (`<tool> --version`), then
//! runs through the command runner. Privileged commands get `sudo` unless
//! the process is already root. Output streams to the terminal in verbose
//! mode and is captured otherwise.

use crate::errors::{Result, UpkitError};
use crate::kernel::KernelGate;
use crate::pipeline::{StepContext, StepStatus};
use crate::runner::{CommandSpec, RunOptions};
use tracing::info;

fn require_tool(ctx: &StepContext<'_>, tool: &str) -> Result<()> {
    if ctx.runner.is_installed(tool) {
        Ok(())
    } else {
        Err(UpkitError::ToolNotInstalled {
            tool: tool.to_string(),
        })
    }
}

fn run_privileged(ctx: &StepContext<'_>, argv: &[&str], verbose: bool) -> Result<()> {
    let spec = CommandSpec::privileged(ctx.elevate, argv.iter().copied());
    run_spec(ctx, &spec, verbose)
}

fn run_unprivileged(ctx: &StepContext<'_>, argv: &[&str], verbose: bool) -> Result<()> {
    let spec = CommandSpec::new(argv.iter().copied());
    run_spec(ctx, &spec, verbose)
}

fn run_spec(ctx: &StepContext<'_>, spec: &CommandSpec, verbose: bool) -> Result<()> {
    ctx.runner
        .run(spec, RunOptions::streaming(verbose))
        .into_result(spec)?;
    Ok(())
}

/// Kernel gate; records the confirmed version for the initramfs step
pub fn kernel_gate(ctx: &mut StepContext<'_>, _verbose: bool) -> Result<StepStatus> {
    let state = KernelGate::new(&ctx.config.kernel).run(ctx.runner, ctx.prompt)?;

    match state.confirmed_version() {
        Some(version) => {
            ctx.confirmed_kernel = Some(version.to_string());
            Ok(StepStatus::Message(format!("Kernel update to {} confirmed.", version)))
        }
        None => Ok(StepStatus::Message("No new kernel version detected.".to_string())),
    }
}

pub fn dnf_update(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    let dnf = ctx.config.tools.dnf.as_str();
    require_tool(ctx, dnf)?;
    run_privileged(ctx, &[dnf, "update", "-y"], verbose)?;
    Ok(StepStatus::Completed)
}

/// Drop cached packages, then stale metadata
pub fn dnf_clean_cache(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    let dnf = ctx.config.tools.dnf.as_str();
    require_tool(ctx, dnf)?;
    run_privileged(ctx, &[dnf, "clean", "packages"], verbose)?;
    run_privileged(ctx, &[dnf, "clean", "metadata"], verbose)?;
    Ok(StepStatus::Completed)
}

pub fn apt_update(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    let apt = ctx.config.tools.apt.as_str();
    require_tool(ctx, apt)?;
    run_privileged(ctx, &[apt, "update"], verbose)?;
    run_privileged(ctx, &[apt, "upgrade", "-y"], verbose)?;
    Ok(StepStatus::Completed)
}

/// Only after a kernel update was confirmed in this run
pub fn rebuild_initramfs(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    let Some(version) = ctx.confirmed_kernel.as_deref() else {
        return Ok(StepStatus::Message(
            "No kernel update detected. Skipping initramfs rebuild...".to_string(),
        ));
    };

    info!(%version, "Rebuilding initramfs for new kernel");
    run_privileged(ctx, &["dracut", "-f", "--regenerate-all"], verbose)?;
    Ok(StepStatus::Message("Initramfs rebuilt successfully...".to_string()))
}

pub fn rebuild_nvidia_modules(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    require_tool(ctx, "akmods")?;
    run_privileged(ctx, &["akmods", "--force"], verbose)?;
    Ok(StepStatus::Message("NVIDIA kernel modules rebuilt successfully...".to_string()))
}

pub fn snap_refresh(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    require_tool(ctx, "snap")?;
    run_privileged(ctx, &["snap", "refresh"], verbose)?;
    Ok(StepStatus::Completed)
}

/// Flatpak updates run as the invoking user
pub fn flatpak_update(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    require_tool(ctx, "flatpak")?;
    run_unprivileged(ctx, &["flatpak", "update", "-y"], verbose)?;
    Ok(StepStatus::Completed)
}

/// Homebrew refuses to run as root, so never under sudo
pub fn brew_update(ctx: &mut StepContext<'_>, verbose: bool) -> Result<StepStatus> {
    require_tool(ctx, "brew")?;
    run_unprivileged(ctx, &["brew", "update"], verbose)?;
    run_unprivileged(ctx, &["brew", "upgrade"], verbose)?;
    Ok(StepStatus::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpkitConfig;
    use crate::testing::{ScriptedPrompt, ScriptedRunner};

    #[test]
    fn test_initramfs_skipped_without_confirmed_kernel() {
        let runner = ScriptedRunner::new();
        let prompt = ScriptedPrompt::interrupted();
        let config = UpkitConfig::default();
        let mut ctx = StepContext::new(&runner, &prompt, &config, true);

        let status = rebuild_initramfs(&mut ctx, false).unwrap();
        assert_eq!(
            status.message(),
            Some("No kernel update detected. Skipping initramfs rebuild...")
        );
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_initramfs_rebuilt_after_confirmation() {
        let runner = ScriptedRunner::new();
        let prompt = ScriptedPrompt::interrupted();
        let config = UpkitConfig::default();
        let mut ctx = StepContext::new(&runner, &prompt, &config, true);
        ctx.confirmed_kernel = Some("6.13.0".to_string());

        rebuild_initramfs(&mut ctx, false).unwrap();
        assert_eq!(runner.calls(), vec!["sudo dracut -f --regenerate-all"]);
    }

    #[test]
    fn test_kernel_gate_records_confirmed_version() {
        let runner = ScriptedRunner::new()
            .exits("dnf5 check-upgrade", 100)
            .prints("dnf5 check-update kernel-helper", 100, "kernel-helper 6.13.0-100.fc41 updates\n");
        let prompt = ScriptedPrompt::answering("y");
        let config = UpkitConfig::default();
        let mut ctx = StepContext::new(&runner, &prompt, &config, true);

        let status = kernel_gate(&mut ctx, false).unwrap();
        assert_eq!(ctx.confirmed_kernel.as_deref(), Some("6.13.0"));
        assert_eq!(status.message(), Some("Kernel update to 6.13.0 confirmed."));
    }

    #[test]
    fn test_missing_tool_reports_not_installed() {
        let runner = ScriptedRunner::new().without_tool("akmods");
        let prompt = ScriptedPrompt::interrupted();
        let config = UpkitConfig::default();
        let mut ctx = StepContext::new(&runner, &prompt, &config, true);

        let err = rebuild_nvidia_modules(&mut ctx, false).unwrap_err();
        assert!(matches!(err, UpkitError::ToolNotInstalled { ref tool } if tool == "akmods"));
        assert_eq!(runner.actions(), Vec::<String>::new());
    }

    #[test]
    fn test_configured_dnf_binary() {
        let runner = ScriptedRunner::new();
        let prompt = ScriptedPrompt::interrupted();
        let mut config = UpkitConfig::default();
        config.tools.dnf = "dnf5".to_string();
        let mut ctx = StepContext::new(&runner, &prompt, &config, true);

        dnf_update(&mut ctx, false).unwrap();
        assert_eq!(runner.calls(), vec!["dnf5 --version", "sudo dnf5 update -y"]);
    }

    #[test]
    fn test_apt_stops_after_failed_update() {
        let runner = ScriptedRunner::new().exits("sudo apt update", 100);
        let prompt = ScriptedPrompt::interrupted();
        let config = UpkitConfig::default();
        let mut ctx = StepContext::new(&runner, &prompt, &config, true);

        let err = apt_update(&mut ctx, false).unwrap_err();
        assert!(matches!(err, UpkitError::ToolExecutionFailed { code: 100, .. }));
        assert!(!runner.called("sudo apt upgrade"));
    }

    #[test]
    fn test_brew_never_uses_sudo() {
        let runner = ScriptedRunner::new();
        let prompt = ScriptedPrompt::interrupted();
        let config = UpkitConfig::default();
        let mut ctx = StepContext::new(&runner, &prompt, &config, true);

        brew_update(&mut ctx, false).unwrap();
        assert_eq!(runner.actions(), vec!["brew update", "brew upgrade"]);
    }
}
