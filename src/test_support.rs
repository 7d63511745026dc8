//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::time::sleep;

use crate::provider::{MeshName, MeshProvider, MeshRequest, ProviderError, ProviderFuture};

/// Log line the scripted agent prints once it is ready for work.
pub const AGENT_READY_LINE: &str = "Listening for Jobs";

/// Kind of provider call recorded by [`ScriptedProvider`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CallKind {
    /// `create`
    Create,
    /// `delete`
    Delete,
    /// `application_status`
    ApplicationStatus,
    /// `service_status`
    ServiceStatus,
    /// `container_log`
    ContainerLog,
}

/// Records a single call made through [`ScriptedProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderCall {
    /// Operation invoked.
    pub kind: CallKind,
    /// Mesh the call targeted.
    pub mesh: MeshName,
}

/// Scripted provider that replays pre-seeded responses per mesh.
///
/// Every mesh gets its own cursor over the shared scripts. The last entry of
/// a script repeats once reached. After `delete` every status and log query
/// for that mesh answers `NotFound`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    application: Vec<Result<String, ProviderError>>,
    service: Vec<Result<String, ProviderError>>,
    logs: Vec<Result<String, ProviderError>>,
    create_failures: Vec<ProviderError>,
    delete_failures: Vec<ProviderError>,
    create_delay: Duration,
    delete_delay: Duration,
    meshes: HashMap<MeshName, MeshProgress>,
    created: Vec<MeshName>,
    calls: Vec<ProviderCall>,
    provisioning: usize,
    peak_provisioning: usize,
}

#[derive(Debug, Default)]
struct MeshProgress {
    application: usize,
    service: usize,
    logs: usize,
    provisioning: bool,
    deleted: bool,
}

impl ScriptState {
    fn record(&mut self, kind: CallKind, mesh: &MeshName) {
        self.calls.push(ProviderCall {
            kind,
            mesh: mesh.clone(),
        });
    }

    fn finish_provisioning(&mut self, mesh: &MeshName) {
        if let Some(progress) = self
            .meshes
            .get_mut(mesh)
            .filter(|progress| progress.provisioning)
        {
            progress.provisioning = false;
            self.provisioning -= 1;
        }
    }
}

fn next_step(
    script: &[Result<String, ProviderError>],
    cursor: &mut usize,
    fallback: Result<String, ProviderError>,
) -> (Result<String, ProviderError>, bool) {
    let Some(last_index) = script.len().checked_sub(1) else {
        return (fallback, true);
    };
    let index = (*cursor).min(last_index);
    *cursor = index + 1;
    let step = script.get(index).cloned().unwrap_or(fallback);
    (step, index == last_index)
}

fn not_found(name: &MeshName) -> ProviderError {
    ProviderError::NotFound {
        resource: name.to_string(),
    }
}

impl ScriptedProvider {
    /// Creates a provider with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ScriptState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Scripts successful application status strings.
    pub fn script_application<I, S>(&self, statuses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_application_steps(statuses.into_iter().map(|s| Ok(s.into())));
    }

    /// Scripts application responses including errors.
    pub fn script_application_steps(
        &self,
        steps: impl IntoIterator<Item = Result<String, ProviderError>>,
    ) {
        let script = steps.into_iter().collect();
        self.with_state(|state| state.application = script);
    }

    /// Scripts successful service status strings.
    pub fn script_service<I, S>(&self, statuses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_service_steps(statuses.into_iter().map(|s| Ok(s.into())));
    }

    /// Scripts service responses including errors.
    pub fn script_service_steps(
        &self,
        steps: impl IntoIterator<Item = Result<String, ProviderError>>,
    ) {
        let script = steps.into_iter().collect();
        self.with_state(|state| state.service = script);
    }

    /// Scripts container log responses. Reaching the last entry marks the
    /// mesh as no longer provisioning.
    pub fn script_logs(&self, steps: impl IntoIterator<Item = Result<String, ProviderError>>) {
        let script = steps.into_iter().collect();
        self.with_state(|state| state.logs = script);
    }

    /// Scripts a mesh that provisions cleanly: the application is created,
    /// the service comes up, and the agent log ends with
    /// [`AGENT_READY_LINE`].
    pub fn script_healthy_mesh(&self) {
        self.script_application(["Creating", "Creating", "Ready"]);
        self.script_service(["Unknown", "Ready"]);
        self.script_logs([
            Err(ProviderError::NotReady {
                resource: String::from("container"),
            }),
            Ok(String::from("Starting agent\n")),
            Ok(format!("Starting agent\n{AGENT_READY_LINE}\n")),
        ]);
    }

    /// Makes the next `create` call fail with `error`.
    pub fn fail_next_create(&self, error: ProviderError) {
        self.with_state(|state| state.create_failures.push(error));
    }

    /// Makes the next `delete` call fail with `error`.
    pub fn fail_next_delete(&self, error: ProviderError) {
        self.with_state(|state| state.delete_failures.push(error));
    }

    /// Delays every `create` call by `delay`.
    pub fn set_create_delay(&self, delay: Duration) {
        self.with_state(|state| state.create_delay = delay);
    }

    /// Delays every `delete` call by `delay` before it answers.
    pub fn set_delete_delay(&self, delay: Duration) {
        self.with_state(|state| state.delete_delay = delay);
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Counts recorded calls of `kind`.
    #[must_use]
    pub fn count(&self, kind: CallKind) -> usize {
        self.with_state(|state| state.calls.iter().filter(|call| call.kind == kind).count())
    }

    /// Counts recorded calls of `kind` against `mesh`.
    #[must_use]
    pub fn count_for(&self, mesh: &MeshName, kind: CallKind) -> usize {
        self.with_state(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.kind == kind && &call.mesh == mesh)
                .count()
        })
    }

    /// Counts every recorded call against `mesh`.
    #[must_use]
    pub fn total_for(&self, mesh: &MeshName) -> usize {
        self.with_state(|state| state.calls.iter().filter(|call| &call.mesh == mesh).count())
    }

    /// Names of meshes created successfully, in creation order.
    #[must_use]
    pub fn created(&self) -> Vec<MeshName> {
        self.with_state(|state| state.created.clone())
    }

    /// Largest number of meshes observed between a successful `create` and
    /// the final scripted log response.
    #[must_use]
    pub fn peak_provisioning(&self) -> usize {
        self.with_state(|state| state.peak_provisioning)
    }

    fn status_step(&self, name: &MeshName, kind: CallKind) -> Result<String, ProviderError> {
        self.with_state(|state| {
            state.record(kind, name);
            let ScriptState {
                application,
                service,
                meshes,
                ..
            } = state;
            let progress = meshes.entry(name.clone()).or_default();
            if progress.deleted {
                return Err(not_found(name));
            }
            let (script, cursor) = if kind == CallKind::ApplicationStatus {
                (application, &mut progress.application)
            } else {
                (service, &mut progress.service)
            };
            next_step(script, cursor, Ok(String::from("Unknown"))).0
        })
    }

    fn log_step(&self, name: &MeshName) -> Result<String, ProviderError> {
        self.with_state(|state| {
            state.record(CallKind::ContainerLog, name);
            let ScriptState { logs, meshes, .. } = state;
            let progress = meshes.entry(name.clone()).or_default();
            if progress.deleted {
                return Err(not_found(name));
            }
            let fallback = Err(ProviderError::NotReady {
                resource: String::from("container"),
            });
            let (step, last) = next_step(logs, &mut progress.logs, fallback);
            if last {
                state.finish_provisioning(name);
            }
            step
        })
    }
}

impl MeshProvider for ScriptedProvider {
    fn create<'a>(
        &'a self,
        name: &'a MeshName,
        _request: &'a MeshRequest,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let delay = self.with_state(|state| {
                state.record(CallKind::Create, name);
                state.create_delay
            });
            if !delay.is_zero() {
                sleep(delay).await;
            }
            self.with_state(|state| {
                if !state.create_failures.is_empty() {
                    return Err(state.create_failures.remove(0));
                }
                state.created.push(name.clone());
                let progress = state.meshes.entry(name.clone()).or_default();
                progress.provisioning = true;
                state.provisioning += 1;
                state.peak_provisioning = state.peak_provisioning.max(state.provisioning);
                Ok(())
            })
        })
    }

    fn delete<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let delay = self.with_state(|state| {
                state.record(CallKind::Delete, name);
                state.delete_delay
            });
            if !delay.is_zero() {
                sleep(delay).await;
            }
            self.with_state(|state| {
                if !state.delete_failures.is_empty() {
                    return Err(state.delete_failures.remove(0));
                }
                state.finish_provisioning(name);
                state.meshes.entry(name.clone()).or_default().deleted = true;
                Ok(())
            })
        })
    }

    fn application_status<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, String> {
        Box::pin(async move { self.status_step(name, CallKind::ApplicationStatus) })
    }

    fn service_status<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, String> {
        Box::pin(async move { self.status_step(name, CallKind::ServiceStatus) })
    }

    fn container_log<'a>(&'a self, name: &'a MeshName, _replica: u32) -> ProviderFuture<'a, String> {
        Box::pin(async move { self.log_step(name) })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
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
