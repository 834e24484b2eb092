//! System-backed `ServiceControl` implementation.

use bmi_core::config::BmiConfig;
use bmi_core::error::{BmiError, BmiResult};
use bmi_core::exec::{CommandOutput, CommandRunner};
use bmi_provider::ServiceControl;
use log::{debug, info};
use std::io;

/// LSB exit code for "program is not running".
const STATUS_NOT_RUNNING: i32 = 3;

/// Controls the export service via `service <name> <action>`.
///
/// Service calls block until the process exits; a restart is never cut short.
#[derive(Clone)]
pub struct SystemIetService {
    runner: CommandRunner,
    service_name: String,
    sudo_password: Option<String>,
}

impl SystemIetService {
    pub fn from_config(config: &BmiConfig) -> BmiResult<Self> {
        let export = &config.export;
        let sudo_path = export
            .sudo_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty());

        let (runner, sudo_password) = match sudo_path {
            Some(sudo) => {
                let password = export.sudo_password.clone().ok_or_else(|| {
                    BmiError::InvalidConfig("export.sudo_path requires export.sudo_password".into())
                })?;
                let runner = CommandRunner::unbounded(sudo)
                    .with_prefix(["-S".to_string(), export.service_binary.clone()]);
                (runner, Some(password))
            }
            None => (CommandRunner::unbounded(&export.service_binary), None),
        };

        Ok(Self {
            runner,
            service_name: export.service_name.clone(),
            sudo_password,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn invoke(&self, action: &str) -> BmiResult<CommandOutput> {
        debug!("service {} {action}", self.service_name);
        let input = self
            .sudo_password
            .as_ref()
            .map(|password| format!("{password}\n").into_bytes());
        self.runner
            .run(&[self.service_name.as_str(), action], input.as_deref())
    }
}

impl std::fmt::Debug for SystemIetService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemIetService")
            .field("runner", &self.runner)
            .field("service_name", &self.service_name)
            .field("sudo", &self.sudo_password.is_some())
            .finish()
    }
}

impl ServiceControl for SystemIetService {
    type Error = BmiError;

    fn restart(&self) -> BmiResult<()> {
        let output = self.invoke("restart")?;
        if !output.success() {
            return Err(BmiError::RestartFailed(output.describe()));
        }
        info!("restarted {}", self.service_name);
        Ok(())
    }

    fn stop(&self) -> BmiResult<()> {
        let output = self.invoke("stop")?;
        if !output.success() {
            return Err(BmiError::StopFailed(output.describe()));
        }
        info!("stopped {}", self.service_name);
        Ok(())
    }

    fn status(&self) -> BmiResult<String> {
        let output = self.invoke("status")?;
        if output.status != 0 && output.status != STATUS_NOT_RUNNING {
            return Err(BmiError::Io(io::Error::other(format!(
                "service {} status failed: {}",
                self.service_name,
                output.describe()
            ))));
        }
        Ok(output.stdout)
    }
}
