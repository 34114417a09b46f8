//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::pending;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::config::DeployerConfig;
use crate::probe::{CommandOutput, CommandRunner, ProbeError, ProbeFuture, SshProbe, SshTarget};
use crate::provider::{Instance, InstanceStatus, LaunchRequest, Provider, ProviderFuture, SshKey};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns a configuration carrying the documented defaults and `api_key`.
#[must_use]
pub fn deployer_config(api_key: &str) -> DeployerConfig {
    DeployerConfig {
        instance_name: String::from("kubetest2-lambda"),
        region: String::from("us-east-1"),
        instance_type: String::from("gpu_1x_a100_sxm4"),
        image: String::from("Lambda Stack 24.04"),
        ssh_key: None,
        ssh_user: String::from("ubuntu"),
        api_key: api_key.to_owned(),
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProbeFuture<'a, CommandOutput> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let response = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| ProbeError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            });
        Box::pin(async move { response })
    }
}

/// A call observed by [`FakeCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FakeCall {
    /// `list_instances`.
    ListInstances,
    /// `launch_instance` with the submitted request.
    Launch(LaunchRequest),
    /// `terminate_instance` with the instance identifier.
    Terminate(String),
    /// `list_keys`.
    ListKeys,
    /// `add_key` with the key name.
    AddKey(String),
    /// `delete_key` with the key identifier.
    DeleteKey(String),
}

/// Failures produced by [`FakeCloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeCloudError {
    /// A failure injected by the test.
    #[error("scripted failure: {0}")]
    Scripted(&'static str),
    /// The referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A key with the same name is already registered.
    #[error("duplicate key name: {0}")]
    DuplicateKey(String),
    /// Launch was acknowledged without an instance identifier.
    #[error("no instance IDs returned")]
    EmptyLaunch,
}

#[derive(Debug)]
struct CloudState {
    instances: Vec<Instance>,
    keys: Vec<SshKey>,
    calls: Vec<FakeCall>,
    launch_id: Option<String>,
    launched: Option<String>,
    address_after: Option<(u32, String)>,
    lists_since_launch: u32,
    failing_instance_lists: u32,
    fail_launch: bool,
    fail_terminate: bool,
    fail_list_keys: bool,
    fail_delete_key: bool,
    next_key_id: u32,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            keys: Vec::new(),
            calls: Vec::new(),
            launch_id: Some(String::from("i-123")),
            launched: None,
            address_after: None,
            lists_since_launch: 0,
            failing_instance_lists: 0,
            fail_launch: false,
            fail_terminate: false,
            fail_list_keys: false,
            fail_delete_key: false,
            next_key_id: 1,
        }
    }
}

impl CloudState {
    fn reveal_address(&mut self) {
        let Some(launched) = self.launched.clone() else {
            return;
        };
        self.lists_since_launch += 1;
        let Some((after, address)) = self.address_after.clone() else {
            return;
        };
        if self.lists_since_launch < after {
            return;
        }
        if let Some(instance) = self.instances.iter_mut().find(|inst| inst.id == launched) {
            if instance.address().is_none() {
                instance.ip = Some(address);
                instance.status = InstanceStatus::Active;
            }
        }
    }
}

/// In-memory [`Provider`] with scriptable failures and call recording.
///
/// Launch returns `i-123` by default. Launched instances start `booting`
/// without an address until [`FakeCloud::assign_address_after`] says
/// otherwise, at which point they turn `active`.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identifier the next launch returns. `None` simulates an
    /// acknowledged launch with no identifiers.
    #[must_use]
    pub fn launch_returns(self, id: Option<&str>) -> Self {
        lock(&self.state).launch_id = id.map(str::to_owned);
        self
    }

    /// Makes the launched instance report `address` from the `lists`-th
    /// instance listing after launch onwards.
    #[must_use]
    pub fn assign_address_after(self, lists: u32, address: &str) -> Self {
        lock(&self.state).address_after = Some((lists, address.to_owned()));
        self
    }

    /// Fails the next `count` instance listings.
    #[must_use]
    pub fn fail_next_instance_lists(self, count: u32) -> Self {
        lock(&self.state).failing_instance_lists = count;
        self
    }

    /// Fails every launch.
    #[must_use]
    pub fn fail_launch(self) -> Self {
        lock(&self.state).fail_launch = true;
        self
    }

    /// Fails every termination.
    #[must_use]
    pub fn fail_terminate(self) -> Self {
        lock(&self.state).fail_terminate = true;
        self
    }

    /// Fails every key listing.
    #[must_use]
    pub fn fail_list_keys(self) -> Self {
        lock(&self.state).fail_list_keys = true;
        self
    }

    /// Fails every key deletion.
    #[must_use]
    pub fn fail_delete_key(self) -> Self {
        lock(&self.state).fail_delete_key = true;
        self
    }

    /// Seeds an existing instance.
    #[must_use]
    pub fn with_instance(self, id: &str, name: &str, status: InstanceStatus) -> Self {
        lock(&self.state).instances.push(Instance {
            id: id.to_owned(),
            name: Some(name.to_owned()),
            status,
            ip: None,
            instance_type: None,
        });
        self
    }

    /// Seeds an existing registered key.
    #[must_use]
    pub fn with_key(self, id: &str, name: &str) -> Self {
        lock(&self.state).keys.push(SshKey {
            id: id.to_owned(),
            name: name.to_owned(),
            public_key: String::from("ssh-ed25519 AAAAseeded"),
        });
        self
    }

    /// Overrides the status of an instance.
    pub fn set_status(&self, id: &str, status: InstanceStatus) {
        if let Some(instance) = lock(&self.state)
            .instances
            .iter_mut()
            .find(|inst| inst.id == id)
        {
            instance.status = status;
        }
    }

    /// Returns every call observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<FakeCall> {
        lock(&self.state).calls.clone()
    }

    /// Returns the registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<SshKey> {
        lock(&self.state).keys.clone()
    }

    /// Returns the known instances.
    #[must_use]
    pub fn instances(&self) -> Vec<Instance> {
        lock(&self.state).instances.clone()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CloudState) -> T) -> T {
        f(&mut lock(&self.state))
    }
}

impl Provider for FakeCloud {
    type Error = FakeCloudError;

    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(FakeCall::ListInstances);
                if state.failing_instance_lists > 0 {
                    state.failing_instance_lists -= 1;
                    return Err(FakeCloudError::Scripted("list instances"));
                }
                state.reveal_address();
                Ok(state.instances.clone())
            })
        })
    }

    fn launch_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(FakeCall::Launch(request.clone()));
                if state.fail_launch {
                    return Err(FakeCloudError::Scripted("launch"));
                }
                let id = state
                    .launch_id
                    .clone()
                    .ok_or(FakeCloudError::EmptyLaunch)?;
                state.instances.push(Instance {
                    id: id.clone(),
                    name: request.name.clone(),
                    status: InstanceStatus::Booting,
                    ip: None,
                    instance_type: None,
                });
                state.launched = Some(id.clone());
                state.lists_since_launch = 0;
                Ok(id)
            })
        })
    }

    fn terminate_instance<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(FakeCall::Terminate(id.to_owned()));
                if state.fail_terminate {
                    return Err(FakeCloudError::Scripted("terminate"));
                }
                let instance = state
                    .instances
                    .iter_mut()
                    .find(|inst| inst.id == id)
                    .ok_or_else(|| FakeCloudError::NotFound(id.to_owned()))?;
                instance.status = InstanceStatus::Terminated;
                Ok(())
            })
        })
    }

    fn list_keys(&self) -> ProviderFuture<'_, Vec<SshKey>, Self::Error> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(FakeCall::ListKeys);
                if state.fail_list_keys {
                    return Err(FakeCloudError::Scripted("list keys"));
                }
                Ok(state.keys.clone())
            })
        })
    }

    fn add_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(FakeCall::AddKey(name.to_owned()));
                if state.keys.iter().any(|key| key.name == name) {
                    return Err(FakeCloudError::DuplicateKey(name.to_owned()));
                }
                let id = format!("key-{}", state.next_key_id);
                state.next_key_id += 1;
                state.keys.push(SshKey {
                    id,
                    name: name.to_owned(),
                    public_key: public_key.to_owned(),
                });
                Ok(())
            })
        })
    }

    fn delete_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.with_state(|state| {
                state.calls.push(FakeCall::DeleteKey(id.to_owned()));
                if state.fail_delete_key {
                    return Err(FakeCloudError::Scripted("delete key"));
                }
                let before = state.keys.len();
                state.keys.retain(|key| key.id != id);
                if state.keys.len() == before {
                    return Err(FakeCloudError::NotFound(id.to_owned()));
                }
                Ok(())
            })
        })
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    succeed_on: Option<u32>,
    stall: bool,
    targets: Vec<SshTarget>,
}

/// [`SshProbe`] that succeeds from a chosen attempt onwards.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ScriptedProbe {
    /// Succeeds on the `attempt`-th probe (1-based) and every probe after it.
    #[must_use]
    pub fn succeed_on(attempt: u32) -> Self {
        let probe = Self::default();
        lock(&probe.state).succeed_on = Some(attempt);
        probe
    }

    /// Never succeeds.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Every probe stays pending until the caller drops it, like an `ssh`
    /// connection to a host that never answers.
    #[must_use]
    pub fn stalled() -> Self {
        let probe = Self::default();
        lock(&probe.state).stall = true;
        probe
    }

    /// Returns every target probed so far.
    #[must_use]
    pub fn targets(&self) -> Vec<SshTarget> {
        lock(&self.state).targets.clone()
    }
}

impl SshProbe for ScriptedProbe {
    fn probe<'a>(&'a self, target: &'a SshTarget) -> ProbeFuture<'a, ()> {
        let mut state = lock(&self.state);
        state.targets.push(target.clone());
        if state.stall {
            return Box::pin(pending());
        }
        let attempt = u32::try_from(state.targets.len()).unwrap_or(u32::MAX);
        let outcome = if state.succeed_on.is_some_and(|first| attempt >= first) {
            Ok(())
        } else {
            Err(ProbeError::Rejected {
                status: String::from("exited with status 255"),
                stderr: String::from("Connection refused"),
            })
        };
        Box::pin(async move { outcome })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
