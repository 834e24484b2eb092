//! Command routing: `(credentials, command, args)` to an orchestrator call.
//!
//! Commands are looked up in a registry built once at startup. Arguments are
//! positional JSON values; every reply carries an HTTP-style status code.

use crate::error::{BmiError, BmiResult, ErrorKind};
use crate::orchestrator::{Orchestrator, Services};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Caller identity: `token` is base64 of `user:password`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub project: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str, project: &str) -> Self {
        Self {
            token: STANDARD.encode(format!("{username}:{password}")),
            project: project.to_string(),
        }
    }

    /// Decode the token into `(username, password)`.
    pub fn decode(&self) -> BmiResult<(String, String)> {
        let raw = STANDARD
            .decode(self.token.trim())
            .map_err(|err| BmiError::Authorization(format!("malformed token: {err}")))?;
        let text = String::from_utf8(raw)
            .map_err(|_| BmiError::Authorization("token is not valid UTF-8".into()))?;
        let (username, password) = text
            .split_once(':')
            .ok_or_else(|| BmiError::Authorization("token must encode user:password".into()))?;
        Ok((username.to_string(), password.to_string()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub credentials: Credentials,
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Success {
        status_code: u16,
        body: Value,
    },
    Failure {
        status_code: u16,
        kind: ErrorKind,
        message: String,
    },
}

impl CommandResponse {
    pub fn ok(body: Value) -> Self {
        CommandResponse::Success {
            status_code: 200,
            body,
        }
    }

    pub fn from_error(err: &BmiError) -> Self {
        CommandResponse::Failure {
            status_code: err.status_code(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            CommandResponse::Success { status_code, .. }
            | CommandResponse::Failure { status_code, .. } => *status_code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandResponse::Success { .. })
    }
}

/// Positional argument accessor for one command.
pub struct Args<'a> {
    command: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(command: &'a str, values: &'a [Value]) -> Self {
        Self { command, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn invalid(&self, idx: usize, expected: &str) -> BmiError {
        BmiError::InvalidArguments(format!(
            "{}: argument {} must be {expected}",
            self.command,
            idx + 1
        ))
    }

    fn present(&self, idx: usize) -> Option<&'a Value> {
        self.values.get(idx).filter(|value| !value.is_null())
    }

    pub fn str(&self, idx: usize) -> BmiResult<&'a str> {
        self.opt_str(idx)?
            .ok_or_else(|| self.invalid(idx, "a string"))
    }

    pub fn opt_str(&self, idx: usize) -> BmiResult<Option<&'a str>> {
        match self.present(idx) {
            None => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.as_str())),
            Some(_) => Err(self.invalid(idx, "a string")),
        }
    }

    /// Booleans, also accepting `"true"`/`"false"` strings. Missing is false.
    pub fn flag(&self, idx: usize) -> BmiResult<bool> {
        match self.present(idx) {
            None => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::String(text)) if text.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(text)) if text.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(self.invalid(idx, "a boolean")),
        }
    }

    /// Unsigned ids given as numbers or numeric strings.
    pub fn opt_id(&self, idx: usize) -> BmiResult<Option<u64>> {
        match self.present(idx) {
            None => Ok(None),
            Some(Value::Number(num)) => num
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(idx, "a non-negative integer")),
            Some(Value::String(text)) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(idx, "a non-negative integer")),
            Some(_) => Err(self.invalid(idx, "a non-negative integer")),
        }
    }

    fn at_most(&self, max: usize) -> BmiResult<()> {
        if self.values.len() > max {
            return Err(BmiError::InvalidArguments(format!(
                "{} takes at most {max} argument(s), got {}",
                self.command,
                self.values.len()
            )));
        }
        Ok(())
    }
}

pub type Handler = fn(&Orchestrator, &Args<'_>) -> BmiResult<Value>;

fn done(_: ()) -> Value {
    Value::Bool(true)
}

const STANDARD_COMMANDS: &[(&str, Handler)] = &[
    ("provision", |o, a| {
        a.at_most(4)?;
        o.provision(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?).map(done)
    }),
    ("deprovision", |o, a| {
        a.at_most(3)?;
        o.deprovision(a.str(0)?, a.str(1)?, a.str(2)?).map(done)
    }),
    ("create_snapshot", |o, a| {
        a.at_most(2)?;
        o.create_snapshot(a.str(0)?, a.str(1)?).map(done)
    }),
    ("list_snapshots", |o, a| {
        a.at_most(0)?;
        Ok(json!(o.list_snapshots()?))
    }),
    ("remove_image", |o, a| {
        a.at_most(1)?;
        o.remove_image(a.str(0)?).map(done)
    }),
    ("list_images", |o, a| {
        a.at_most(0)?;
        Ok(json!(o.list_images()?))
    }),
    ("list_provisioned_nodes", |o, a| {
        a.at_most(0)?;
        Ok(json!(o.list_provisioned_nodes()?))
    }),
    ("list_all_images", |o, a| {
        a.at_most(0)?;
        Ok(serde_json::to_value(o.list_all_images()?)?)
    }),
    ("import_ceph_image", |o, a| {
        a.at_most(1)?;
        o.import_ceph_image(a.str(0)?).map(done)
    }),
    ("import_ceph_snapshot", |o, a| {
        a.at_most(3)?;
        o.import_ceph_snapshot(a.str(0)?, a.str(1)?, a.flag(2)?)
            .map(done)
    }),
    ("export_ceph_image", |o, a| {
        a.at_most(2)?;
        o.export_ceph_image(a.str(0)?, a.str(1)?).map(done)
    }),
    ("copy_image", |o, a| {
        a.at_most(3)?;
        o.copy_image(a.str(0)?, a.str(1)?, a.opt_str(2)?).map(done)
    }),
    ("move_image", |o, a| {
        a.at_most(3)?;
        o.move_image(a.str(0)?, a.str(1)?, a.opt_str(2)?).map(done)
    }),
    ("get_node_ip", |o, a| {
        a.at_most(1)?;
        Ok(json!(o.get_node_ip(a.str(0)?)?))
    }),
    ("add_project", |o, a| {
        a.at_most(3)?;
        Ok(json!(o.add_project(a.str(0)?, a.str(1)?, a.opt_id(2)?)?))
    }),
    ("delete_project", |o, a| {
        a.at_most(1)?;
        o.delete_project(a.str(0)?).map(done)
    }),
    ("list_projects", |o, a| {
        a.at_most(0)?;
        Ok(serde_json::to_value(o.list_projects()?)?)
    }),
    ("add_image", |o, a| {
        a.at_most(6)?;
        let id = o.add_image(
            a.str(0)?,
            a.str(1)?,
            a.opt_id(2)?,
            a.flag(3)?,
            a.opt_str(4)?,
            a.flag(5)?,
        )?;
        Ok(json!(id))
    }),
    ("delete_image", |o, a| {
        a.at_most(2)?;
        o.delete_image(a.str(0)?, a.str(1)?).map(done)
    }),
    ("mount_image", |o, a| {
        a.at_most(1)?;
        o.mount_image(a.str(0)?).map(done)
    }),
    ("umount_image", |o, a| {
        a.at_most(1)?;
        o.umount_image(a.str(0)?).map(done)
    }),
    ("show_mounted", |o, a| {
        a.at_most(0)?;
        Ok(json!(o.show_mounted()?))
    }),
    ("remake_mappings", |o, a| {
        a.at_most(0)?;
        o.remake_mappings().map(done)
    }),
];

/// Names of every command in the standard registry.
pub fn command_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = STANDARD_COMMANDS.iter().map(|(name, _)| *name).collect();
    names.sort_unstable();
    names
}

pub struct CommandRouter {
    services: Arc<Services>,
    handlers: BTreeMap<&'static str, Handler>,
}

impl CommandRouter {
    /// Router with no commands registered.
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            handlers: BTreeMap::new(),
        }
    }

    /// Router with every orchestrator operation registered.
    pub fn standard(services: Arc<Services>) -> Self {
        let mut router = Self::new(services);
        for (name, handler) in STANDARD_COMMANDS {
            router.register(name, *handler);
        }
        router
    }

    pub fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    pub fn commands(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn handle(&self, request: &CommandRequest) -> CommandResponse {
        self.execute(&request.credentials, &request.command, &request.args)
    }

    pub fn execute(&self, credentials: &Credentials, command: &str, args: &[Value]) -> CommandResponse {
        match self.dispatch(credentials, command, args) {
            Ok(body) => {
                info!("command {command} succeeded");
                CommandResponse::ok(body)
            }
            Err(err) => {
                error!("command {command} failed [{:?}]: {err}", err.kind());
                CommandResponse::from_error(&err)
            }
        }
    }

    fn dispatch(&self, credentials: &Credentials, command: &str, args: &[Value]) -> BmiResult<Value> {
        let handler = self
            .handlers
            .get(command)
            .ok_or_else(|| BmiError::UnknownCommand(command.to_string()))?;
        let (username, password) = credentials.decode()?;
        let orchestrator = Orchestrator::open(
            self.services.clone(),
            &username,
            &password,
            &credentials.project,
        )?;
        handler(&orchestrator, &Args::new(command, args)).map_err(|err| orchestrator.humanize(err))
    }
}
