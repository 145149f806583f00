//! The plugin object: authoring surface plus per-account lifecycle
//!
//! A plugin declares commands, raw event listeners, scheduled jobs and
//! hooks on itself, then gets bound to any number of accounts. Binding
//! wires its interests to the account's event stream; unbinding removes
//! exactly those subscriptions and cancels the plugin's jobs.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::errors::{HostError, HostResult};
use crate::application::messaging::{dispatch, HostServices, Outcome};
use crate::domain::entities::{Command, Event, MessageEvent, PluginOption};
use crate::domain::traits::Session;
use crate::infrastructure::plugins::{ModuleToken, PluginLibrary, PluginManifest};
use crate::plugins::router::{self, Subscription};
use crate::plugins::schedule::{JobFn, JobSpawner, KeepAlive, ScheduleManager, ScheduledJob, Trigger};

/// Version a plugin reports until it sets one or adopts its manifest's.
pub const UNSET_VERSION: &str = "0.0.0";

/// Raw event listener
pub type Listener = Arc<dyn Fn(ListenerContext, Event) -> BoxFuture<'static, HostResult<()>> + Send + Sync>;

/// Runs once, right after the plugin is registered.
pub type InitHook = Box<dyn FnOnce(&Arc<Plugin>) -> HostResult<()> + Send>;

/// Runs on every successful bind; may hand back a teardown for the unbind.
pub type BindHook = Arc<dyn Fn(&BindContext) -> HostResult<Option<Teardown>> + Send + Sync>;

pub type Teardown = Box<dyn FnOnce() -> HostResult<()> + Send>;

/// Context handed to raw event listeners
#[derive(Clone)]
pub struct ListenerContext {
    pub plugin: Arc<Plugin>,
    pub session: Arc<dyn Session>,
}

/// Context handed to bind hooks
pub struct BindContext {
    pub plugin: Arc<Plugin>,
    pub session: Arc<dyn Session>,
}

impl BindContext {
    pub fn account_id(&self) -> &str {
        self.session.account_id()
    }
}

/// What a plugin wants from an account's event stream
#[derive(Clone)]
pub enum EventInterest {
    /// Message events, fed through command dispatch.
    Message,
    /// Any event whose category falls under `category`.
    Raw { category: String, listener: Listener },
}

impl EventInterest {
    pub fn label(&self) -> String {
        match self {
            EventInterest::Message => "message".to_string(),
            EventInterest::Raw { category, .. } => category.clone(),
        }
    }
}

/// Lifecycle notifications published by a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Bound(String),
    Unbound(String),
    Destroyed,
}

struct Binding {
    session: Arc<dyn Session>,
    subscriptions: Vec<Subscription>,
    teardowns: Vec<Teardown>,
}

pub struct Plugin {
    name: String,
    version: String,
    description: Option<String>,
    prefix: Option<String>,
    default_option: PluginOption,
    source_path: Option<PathBuf>,
    token: Option<ModuleToken>,
    commands: RwLock<Vec<Command>>,
    interests: RwLock<Vec<EventInterest>>,
    jobs: Mutex<ScheduleManager>,
    spawner: JobSpawner,
    bindings: Mutex<Vec<(String, Binding)>>,
    init_hooks: Mutex<Vec<InitHook>>,
    bind_hooks: RwLock<Vec<BindHook>>,
    lifecycle: broadcast::Sender<Lifecycle>,
    destroyed: AtomicBool,
    // Dropped last: everything above may point into the library's code.
    library: Option<Arc<PluginLibrary>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        let (lifecycle, _) = broadcast::channel(32);
        Self {
            name: name.into(),
            version: UNSET_VERSION.to_string(),
            description: None,
            prefix: None,
            default_option: PluginOption::default(),
            source_path: None,
            token: None,
            commands: RwLock::new(Vec::new()),
            interests: RwLock::new(Vec::new()),
            jobs: Mutex::new(ScheduleManager::new()),
            spawner: Arc::new(ScheduledJob::spawn),
            bindings: Mutex::new(Vec::new()),
            init_hooks: Mutex::new(Vec::new()),
            bind_hooks: RwLock::new(Vec::new()),
            lifecycle,
            destroyed: AtomicBool::new(false),
            library: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Namespaces every command behind a leading word and enables the
    /// per-group apply switch.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Overlays `option` on the built-in `{lock: false, apply: true}`.
    pub fn with_default_option(mut self, option: PluginOption) -> Self {
        self.default_option.merge_from(&option);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn token(&self) -> Option<ModuleToken> {
        self.token
    }

    /// Private copy of the shared library this plugin was loaded from
    pub fn library_file(&self) -> Option<&Path> {
        self.library.as_deref().map(PluginLibrary::shadow_path)
    }

    /// A deep copy of the default option; mutating it never touches the plugin.
    pub fn get_option(&self) -> PluginOption {
        self.default_option.clone()
    }

    // ---- authoring ----

    /// Registers `command`. A command with the same name replaces the old one
    /// in place.
    pub fn command(&self, command: Command) {
        {
            let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
            match commands.iter().position(|c| c.name() == command.name()) {
                Some(index) => commands[index] = command,
                None => commands.push(command),
            }
        }
        let mut interests = self.interests.write().unwrap_or_else(PoisonError::into_inner);
        if !interests.iter().any(|i| matches!(i, EventInterest::Message)) {
            interests.push(EventInterest::Message);
        }
    }

    /// Listens to raw events under `category` (e.g. `notice.group`).
    /// Takes effect on accounts bound afterwards.
    pub fn listen<F, Fut>(&self, category: impl Into<String>, listener: F)
    where
        F: Fn(ListenerContext, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult<()>> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |ctx, event| Box::pin(listener(ctx, event)));
        self.interests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventInterest::Raw {
                category: category.into(),
                listener,
            });
    }

    /// Schedules `job` on a cron expression. Fails with `NoRuntime` outside
    /// of a tokio runtime.
    pub fn schedule<F, Fut>(&self, expr: &str, job: F) -> HostResult<Uuid>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult<()>> + Send + 'static,
    {
        self.start_job(Trigger::cron(expr)?, Arc::new(move || Box::pin(job())))
    }

    /// Schedules `job` every `period`.
    pub fn schedule_every<F, Fut>(&self, period: Duration, job: F) -> HostResult<Uuid>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult<()>> + Send + 'static,
    {
        self.start_job(Trigger::every(period)?, Arc::new(move || Box::pin(job())))
    }

    fn start_job(&self, trigger: Trigger, job: JobFn) -> HostResult<Uuid> {
        if self.is_destroyed() {
            return Err(HostError::PluginDestroyed(self.name.clone()));
        }
        let job = (self.spawner)(&self.name, trigger, job)?;
        debug!(plugin = %self.name, job = %job.label(), "Job scheduled");
        Ok(lock(&self.jobs).add(job))
    }

    pub fn on_init<F>(&self, hook: F)
    where
        F: FnOnce(&Arc<Plugin>) -> HostResult<()> + Send + 'static,
    {
        lock(&self.init_hooks).push(Box::new(hook));
    }

    pub fn on_bind<F>(&self, hook: F)
    where
        F: Fn(&BindContext) -> HostResult<Option<Teardown>> + Send + Sync + 'static,
    {
        self.bind_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    // ---- introspection ----

    pub fn commands(&self) -> Vec<Command> {
        self.commands.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn interests(&self) -> Vec<EventInterest> {
        self.interests.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn job_count(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn bound_accounts(&self) -> Vec<String> {
        lock(&self.bindings).iter().map(|(id, _)| id.clone()).collect()
    }

    /// Sessions in bind order
    pub fn bound_sessions(&self) -> Vec<Arc<dyn Session>> {
        lock(&self.bindings).iter().map(|(_, b)| b.session.clone()).collect()
    }

    pub fn is_bound(&self, account_id: &str) -> bool {
        lock(&self.bindings).iter().any(|(id, _)| id == account_id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Runs the command pipeline directly, bypassing event subscriptions.
    pub async fn handle_message(
        self: &Arc<Self>,
        services: &HostServices,
        session: &Arc<dyn Session>,
        event: &MessageEvent,
    ) -> Vec<(String, Outcome)> {
        dispatch(self, services, session, event).await
    }

    // ---- lifecycle ----

    pub(crate) fn assign_source(&mut self, name: &str, dir: PathBuf, manifest: &PluginManifest, token: ModuleToken) {
        self.name = name.to_string();
        self.source_path = Some(dir);
        self.token = Some(token);
        if self.version == UNSET_VERSION {
            self.version = manifest.version.clone();
        }
        if self.description.is_none() {
            self.description = manifest.description.clone();
        }
    }

    pub(crate) fn set_job_spawner(&mut self, spawner: JobSpawner) {
        self.spawner = spawner;
    }

    /// Ties the plugin to `library`. Jobs are then spawned by host code and
    /// each one keeps the library loaded until its task is gone.
    pub(crate) fn attach_library(&mut self, library: Arc<PluginLibrary>) {
        let keep_alive: KeepAlive = library.clone();
        self.set_job_spawner(Arc::new(move |owner: &str, trigger: Trigger, job: JobFn| {
            ScheduledJob::spawn_holding(owner, trigger, job, Some(keep_alive.clone()))
        }));
        self.library = Some(library);
    }

    /// Runs and drains the init hooks.
    pub(crate) fn run_init(self: &Arc<Self>) -> HostResult<()> {
        let hooks: Vec<InitHook> = lock(&self.init_hooks).drain(..).collect();
        for hook in hooks {
            hook(self)?;
        }
        Ok(())
    }

    /// Starts delivering `session`'s events to this plugin.
    pub fn bind_bot(self: &Arc<Self>, session: Arc<dyn Session>, services: Arc<HostServices>) -> HostResult<()> {
        if self.is_destroyed() {
            return Err(HostError::PluginDestroyed(self.name.clone()));
        }
        let account_id = session.account_id().to_string();
        {
            let mut bindings = lock(&self.bindings);
            if bindings.iter().any(|(id, _)| *id == account_id) {
                return Err(HostError::AlreadyBound {
                    plugin: self.name.clone(),
                    account: account_id,
                });
            }
            let subscriptions = router::wire(self, &session, &services);
            bindings.push((
                account_id.clone(),
                Binding {
                    session: session.clone(),
                    subscriptions,
                    teardowns: Vec::new(),
                },
            ));
        }

        let hooks = self.bind_hooks.read().unwrap_or_else(PoisonError::into_inner).clone();
        let ctx = BindContext {
            plugin: self.clone(),
            session,
        };
        let mut teardowns = Vec::new();
        for hook in hooks {
            match hook(&ctx) {
                Ok(Some(teardown)) => teardowns.push(teardown),
                Ok(None) => {}
                Err(e) => warn!(plugin = %self.name, account = %account_id, error = %e, "Bind hook failed"),
            }
        }
        if !teardowns.is_empty() {
            let mut bindings = lock(&self.bindings);
            if let Some((_, binding)) = bindings.iter_mut().find(|(id, _)| *id == account_id) {
                binding.teardowns.extend(teardowns);
            }
        }

        info!(plugin = %self.name, account = %account_id, "Plugin bound");
        let _ = self.lifecycle.send(Lifecycle::Bound(account_id));
        Ok(())
    }

    /// Stops delivery for `account_id` and cancels the plugin's scheduled
    /// jobs. The binding is gone even if a teardown fails.
    pub fn unbind_bot(&self, account_id: &str) -> HostResult<()> {
        let binding = {
            let mut bindings = lock(&self.bindings);
            let index = bindings
                .iter()
                .position(|(id, _)| id == account_id)
                .ok_or_else(|| HostError::NotBound {
                    plugin: self.name.clone(),
                    account: account_id.to_string(),
                })?;
            bindings.remove(index).1
        };

        let cancelled = lock(&self.jobs).cancel_all();
        let removed = router::unwire(binding.subscriptions);
        debug!(plugin = %self.name, account = %account_id, removed, cancelled, "Subscriptions removed");

        let mut failure = None;
        for teardown in binding.teardowns {
            if let Err(e) = teardown() {
                warn!(plugin = %self.name, account = %account_id, error = %e, "Teardown failed");
                failure.get_or_insert(e);
            }
        }

        info!(plugin = %self.name, account = %account_id, "Plugin unbound");
        let _ = self.lifecycle.send(Lifecycle::Unbound(account_id.to_string()));
        failure.map_or(Ok(()), Err)
    }

    /// Unbinds every account and marks the plugin dead. Keeps going past
    /// individual failures and reports them together.
    pub fn destroy(&self) -> HostResult<()> {
        self.destroyed.store(true, Ordering::SeqCst);

        let mut failures = Vec::new();
        for account_id in self.bound_accounts() {
            if let Err(e) = self.unbind_bot(&account_id) {
                failures.push(format!("{account_id}: {e}"));
            }
        }
        lock(&self.jobs).cancel_all();

        info!(plugin = %self.name, "Plugin destroyed");
        let _ = self.lifecycle.send(Lifecycle::Destroyed);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HostError::DestroyIncomplete {
                plugin: self.name.clone(),
                failures,
            })
        }
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("prefix", &self.prefix)
            .field("source_path", &self.source_path)
            .field("bound", &self.bound_accounts())
            .field("jobs", &lock(&self.jobs).labels())
            .finish()
    }
}
