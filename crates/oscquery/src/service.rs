//! The owning service: tree, host info, HTTP front end and discovery, wired together.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use oscquery_api::ApiState;
use oscquery_core::attributes::is_valid_type_tag;
use oscquery_core::config::OscQueryConfig;
use oscquery_core::{
    Access, HostInfo, OscNode, OscTree, OscTyped, OscValue, ServiceProfile, ServiceType, TreeError,
};
use oscquery_services::{Discovery, MdnsSdTransport, MdnsTransport, NullTransport, PeerEvents};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP server is already running on port {0}")]
    AlreadyRunning(u16),

    #[error("can't advertise the OSCQuery service before the HTTP server is started")]
    NotStarted,

    #[error("already advertising an OSC service on port {0}; only one is supported")]
    OscAlreadyAdvertised(u16),

    #[error("port {0} is out of range 1..=65535")]
    InvalidPort(u16),

    #[error("OSC path must start with '/': {0:?}")]
    InvalidPath(String),

    #[error("no OSC type tag for {0:?}")]
    UnsupportedType(String),

    #[error("path already exists: {0}")]
    DuplicatePath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TreeError> for ServiceError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::InvalidPath(p) => ServiceError::InvalidPath(p),
            TreeError::DuplicatePath(p) => ServiceError::DuplicatePath(p),
        }
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

struct HttpServer {
    port: u16,
    stop: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

pub struct OscQueryService {
    host_ip: IpAddr,
    tree: Arc<OscTree>,
    host_info: Arc<RwLock<HostInfo>>,
    discovery: Arc<Discovery>,
    http: Mutex<Option<HttpServer>>,
    /// Stops the reaper, the refresh loop and the mDNS listener together.
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OscQueryService {
    /// A service using `transport` for discovery. Spawns the cache reaper
    /// and the refresh loop, so it must be called inside a tokio runtime.
    pub fn new(name: impl Into<String>, host_ip: IpAddr, transport: Arc<dyn MdnsTransport>) -> Self {
        Self::with_ttls(
            name,
            host_ip,
            transport,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }

    pub fn with_ttls(
        name: impl Into<String>,
        host_ip: IpAddr,
        transport: Arc<dyn MdnsTransport>,
        default_ttl: Duration,
        max_ttl: Duration,
    ) -> Self {
        let discovery = Arc::new(Discovery::new(transport, default_ttl, max_ttl));
        let (shutdown, _) = broadcast::channel(1);
        let tasks = discovery.start(&shutdown);

        Self {
            host_ip,
            tree: Arc::new(OscTree::new()),
            host_info: Arc::new(RwLock::new(HostInfo::new(name, host_ip))),
            discovery,
            http: Mutex::new(None),
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// A service discovering over multicast DNS.
    pub fn with_mdns(name: impl Into<String>, host_ip: IpAddr) -> anyhow::Result<Self> {
        Self::from_parts(name, host_ip, true, Duration::from_secs(60), Duration::from_secs(60))
    }

    /// Build from config: name, address, discovery switch and TTLs.
    /// Endpoints and ports are left to the caller.
    pub fn from_config(config: &OscQueryConfig) -> anyhow::Result<Self> {
        Self::from_parts(
            config.service.name.clone(),
            config.service.host_ip,
            config.discovery.enabled,
            config.discovery.default_ttl(),
            config.discovery.max_ttl(),
        )
    }

    fn from_parts(
        name: impl Into<String>,
        host_ip: IpAddr,
        discover: bool,
        default_ttl: Duration,
        max_ttl: Duration,
    ) -> anyhow::Result<Self> {
        if !discover {
            tracing::info!("discovery disabled");
            return Ok(Self::with_ttls(name, host_ip, Arc::new(NullTransport), default_ttl, max_ttl));
        }

        let transport = Arc::new(MdnsSdTransport::new()?);
        let service = Self::with_ttls(name, host_ip, transport.clone(), default_ttl, max_ttl);

        let discovery = service.discovery.clone();
        let rx = service.shutdown.subscribe();
        let listener = tokio::spawn(async move {
            if let Err(e) = transport.listener_loop(discovery, rx).await {
                tracing::error!(error = %e, "mDNS listener failed");
            }
        });
        service.track(listener);
        Ok(service)
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn tree(&self) -> &Arc<OscTree> {
        &self.tree
    }

    pub fn host_ip(&self) -> IpAddr {
        self.host_ip
    }

    pub fn host_info(&self) -> HostInfo {
        self.host_info
            .read()
            .map(|h| h.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn name(&self) -> String {
        self.host_info().name
    }

    /// The HTTP port, once started.
    pub fn http_port(&self) -> Option<u16> {
        self.http.lock().ok().and_then(|h| h.as_ref().map(|s| s.port))
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    // ── HTTP ──────────────────────────────────────────────────────────────────

    /// Start serving the tree on `host_ip:port`. Port 0 picks a free one.
    /// Returns the bound port.
    pub async fn start_http(&self, port: u16, advertise: bool) -> Result<u16, ServiceError> {
        if let Some(running) = self.http_port() {
            tracing::error!(port = running, "HTTP server already running");
            return Err(ServiceError::AlreadyRunning(running));
        }

        // Port 0: the OS assigns one on `host_ip`.
        let listener = TcpListener::bind(SocketAddr::new(self.host_ip, port)).await?;
        let port = listener.local_addr()?.port();

        let state = ApiState {
            tree: self.tree.clone(),
            host_info: self.host_info.clone(),
        };
        let (stop, rx) = broadcast::channel(1);
        let task = tokio::spawn(async move {
            if let Err(e) = oscquery_api::serve(state, listener, rx).await {
                tracing::error!(error = %e, "OSCQuery HTTP server failed");
            }
        });

        {
            let mut http = self.http.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(running) = http.as_ref() {
                // Lost a race with another start.
                let _ = stop.send(());
                return Err(ServiceError::AlreadyRunning(running.port));
            }
            *http = Some(HttpServer { port, stop, task });
        }
        tracing::info!(ip = %self.host_ip, port, "OSCQuery server listening");

        if advertise {
            self.advertise_oscquery()?;
        }
        Ok(port)
    }

    // ── Advertising ───────────────────────────────────────────────────────────

    pub fn advertise_oscquery(&self) -> Result<(), ServiceError> {
        let port = self.http_port().ok_or(ServiceError::NotStarted)?;
        let profile = ServiceProfile::new(self.name(), self.host_ip, port, ServiceType::OscQuery);
        if let Err(e) = self.discovery.advertise(profile) {
            tracing::warn!(error = %e, "OSCQuery announcement failed, will retry on refresh");
        }
        Ok(())
    }

    /// Advertise an OSC receiver on `port` and report it in HOST_INFO.
    /// Only one OSC service per instance.
    pub fn advertise_osc(&self, port: u16) -> Result<(), ServiceError> {
        if port == 0 {
            return Err(ServiceError::InvalidPort(port));
        }
        let name = {
            let mut info = self.host_info.write().unwrap_or_else(|e| e.into_inner());
            if info.osc_port != 0 {
                tracing::error!(port = info.osc_port, "OSC service already advertised");
                return Err(ServiceError::OscAlreadyAdvertised(info.osc_port));
            }
            info.osc_port = port;
            info.name.clone()
        };

        let profile = ServiceProfile::new(name, self.host_ip, port, ServiceType::Osc);
        if let Err(e) = self.discovery.advertise(profile) {
            tracing::warn!(error = %e, "OSC announcement failed, will retry on refresh");
        }
        Ok(())
    }

    pub fn refresh_services(&self) {
        self.discovery.refresh_services();
    }

    // ── Endpoints ─────────────────────────────────────────────────────────────

    /// Register an endpoint. Rejects paths not starting with `/`, unknown
    /// type tags and paths that already exist.
    pub fn add_endpoint(
        &self,
        path: &str,
        osc_type: &str,
        access: Access,
        value: Option<Vec<OscValue>>,
        description: &str,
    ) -> Result<Arc<OscNode>, ServiceError> {
        let node = self.endpoint_node(path, osc_type, access, description)?;
        let node = match value {
            Some(v) => node.with_value(v),
            None => node,
        };
        self.register(node)
    }

    /// Register an endpoint whose TYPE comes from `T`.
    pub fn add_endpoint_typed<T: OscTyped + ?Sized>(
        &self,
        path: &str,
        access: Access,
        value: Option<Vec<OscValue>>,
        description: &str,
    ) -> Result<Arc<OscNode>, ServiceError> {
        self.add_endpoint(path, T::OSC_TYPE, access, value, description)
    }

    /// Register an endpoint whose value is read from `provider` on every request.
    pub fn add_dynamic_endpoint<F>(
        &self,
        path: &str,
        osc_type: &str,
        access: Access,
        provider: F,
        description: &str,
    ) -> Result<Arc<OscNode>, ServiceError>
    where
        F: Fn() -> Vec<OscValue> + Send + Sync + 'static,
    {
        let node = self
            .endpoint_node(path, osc_type, access, description)?
            .with_provider(provider);
        self.register(node)
    }

    /// Builder form of [`add_endpoint`](Self::add_endpoint); failures are logged.
    pub fn with_endpoint(
        self,
        path: &str,
        osc_type: &str,
        access: Access,
        value: Option<Vec<OscValue>>,
        description: &str,
    ) -> Self {
        let _ = self.add_endpoint(path, osc_type, access, value, description);
        self
    }

    fn endpoint_node(
        &self,
        path: &str,
        osc_type: &str,
        access: Access,
        description: &str,
    ) -> Result<OscNode, ServiceError> {
        if !path.starts_with('/') {
            tracing::error!(path, "an OSC path must start with '/'");
            return Err(ServiceError::InvalidPath(path.to_string()));
        }
        if !is_valid_type_tag(osc_type) {
            tracing::error!(path, osc_type, "unsupported OSC type");
            return Err(ServiceError::UnsupportedType(osc_type.to_string()));
        }
        let mut node = OscNode::new(path).with_type(osc_type).with_access(access);
        if !description.is_empty() {
            node = node.with_description(description);
        }
        Ok(node)
    }

    fn register(&self, node: OscNode) -> Result<Arc<OscNode>, ServiceError> {
        let path = node.full_path().to_string();
        match self.tree.add(node) {
            Ok(node) => {
                tracing::debug!(path = %path, "endpoint added");
                Ok(node)
            }
            Err(TreeError::DuplicatePath(p)) => {
                tracing::warn!(path = %p, "path already exists, skipping");
                Err(ServiceError::DuplicatePath(p))
            }
            Err(e) => {
                tracing::error!(path = %path, error = %e, "failed to add endpoint");
                Err(e.into())
            }
        }
    }

    /// Remove the endpoint at `path`. Its descendants are left in place.
    pub fn remove_endpoint(&self, path: &str) -> bool {
        if !self.tree.remove(path) {
            tracing::warn!(path, "no endpoint found");
            return false;
        }
        tracing::debug!(path, "endpoint removed");
        true
    }

    /// Set the value at `path`, creating a bare node there if needed.
    pub fn set_value(&self, path: &str, value: Vec<OscValue>) -> Result<(), ServiceError> {
        let node = match self.tree.get(path) {
            Some(node) => node,
            None => match self.tree.add(OscNode::new(path)) {
                Ok(node) => node,
                // Someone else created it in between.
                Err(TreeError::DuplicatePath(_)) => self
                    .tree
                    .get(path)
                    .ok_or_else(|| ServiceError::InvalidPath(path.to_string()))?,
                Err(e) => return Err(e.into()),
            },
        };
        node.set_value(value);
        Ok(())
    }

    // ── Discovered peers ──────────────────────────────────────────────────────

    pub fn oscquery_services(&self) -> Vec<ServiceProfile> {
        self.discovery.discovered_of(ServiceType::OscQuery)
    }

    pub fn osc_services(&self) -> Vec<ServiceProfile> {
        self.discovery.discovered_of(ServiceType::Osc)
    }

    pub fn subscribe_oscquery(&self) -> PeerEvents {
        self.discovery.subscribe_oscquery()
    }

    pub fn subscribe_osc(&self) -> PeerEvents {
        self.discovery.subscribe_osc()
    }

    pub fn subscribe_any(&self) -> PeerEvents {
        self.discovery.subscribe_any()
    }

    pub fn subscribe_removed(&self) -> PeerEvents {
        self.discovery.subscribe_removed()
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Retract advertisements, stop the listeners and the background tasks.
    /// Each step runs even if an earlier one failed.
    pub async fn shutdown(&self) {
        self.discovery.unadvertise_all();

        if self.shutdown.send(()).is_err() {
            tracing::debug!("background tasks already stopped");
        }

        let http = self.http.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(server) = http {
            let _ = server.stop.send(());
            if let Err(e) = server.task.await {
                tracing::warn!(error = %e, "HTTP task ended abnormally");
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!("OSCQuery service stopped");
    }
}

impl Drop for OscQueryService {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Ok(mut http) = self.http.lock() {
            if let Some(server) = http.take() {
                let _ = server.stop.send(());
            }
        }
    }
}
