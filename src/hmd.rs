use std::{
    thread,
    time::{Duration, Instant},
};

use nalgebra::{UnitQuaternion, Vector2, Vector3, Vector4};
use smallvec::{smallvec, SmallVec};

use crate::{
    config::{Config, DebugConfig, SessionConfig},
    events::{self, Action, RuntimeEvent, SessionState, SessionStatus, Transition},
    pose::{self, AngleUnit, Eye},
    refresh::{FrameRefreshReport, RefreshTracker},
    swapchain::{Resolution, SessionResources},
    utils::XrCheck,
    vrapi::{
        Capabilities, FrameState, GraphicsBinding, ProjectionView, ReferenceSpace,
        RuntimeProperties, SystemProperties, View, ViewDescriptor, XrRuntime,
    },
};

const OPENGL_EXTENSION: &str = "XR_KHR_opengl_enable";

#[derive(Debug, thiserror::Error)]
pub enum HmdError {
    #[error("{context}: {source}")]
    Runtime {
        context: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("runtime does not support {0}")]
    MissingExtension(&'static str),
    #[error("not connected to the runtime")]
    NotInitialized,
    #[error("already connected to the runtime")]
    AlreadyInitialized,
    #[error("no session")]
    NoSession,
    #[error("a session already exists")]
    SessionActive,
    #[error("session failed")]
    SessionFailed,
    #[error("session stopped before it was synchronized")]
    SessionStopped,
    #[error("runtime reports no views")]
    NoViews,
    #[error("runtime offers no swapchain formats")]
    NoSwapchainFormat,
    #[error("swapchain {view} has no image {index}")]
    NoImage { view: usize, index: u32 },
}

/// What discovery found out about the runtime and the headset.
struct Connection {
    capabilities: Capabilities,
    runtime: RuntimeProperties,
    system: SystemProperties,
    views: SmallVec<[ViewDescriptor; 2]>,
}

type Callback = Box<dyn FnMut()>;

/// Outcome of one round of event processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pumped {
    Events,
    Nothing,
    /// The runtime's event queue couldn't be read.
    PollFailed,
}

/// A head mounted display driven through an XR runtime.
///
/// Everything happens on the calling thread. Lifecycle callbacks are invoked synchronously from
/// [`Hmd::poll_events`] (and the calls that poll internally), and must not call back into the
/// `Hmd`.
pub struct Hmd<R: XrRuntime> {
    runtime: R,
    application_name: String,
    reference_space: ReferenceSpace,
    session_config: SessionConfig,
    debug: DebugConfig,
    resolution_override: Option<Resolution>,

    instance: bool,
    connection: Option<Connection>,
    resolution: Resolution,

    session_open: bool,
    status: SessionStatus,
    state: SessionState,
    session: Option<SessionResources>,

    frame_state: FrameState,
    /// A frame was waited on and not yet submitted.
    frame_pending: bool,
    views: SmallVec<[View; 2]>,
    refresh: RefreshTracker,

    on_idle: Option<Callback>,
    on_visible: Option<Callback>,
    on_focused: Option<Callback>,
}

impl<R: XrRuntime> Hmd<R> {
    pub fn new(runtime: R, application_name: &str, seated: bool) -> Self {
        Self {
            runtime,
            application_name: application_name.to_owned(),
            reference_space: ReferenceSpace::from_seated(seated),
            session_config: SessionConfig::default(),
            debug: DebugConfig::default(),
            resolution_override: None,
            instance: false,
            connection: None,
            resolution: Resolution::default(),
            session_open: false,
            status: SessionStatus::Stopped,
            state: SessionState::Unknown,
            session: None,
            frame_state: FrameState::default(),
            frame_pending: false,
            views: SmallVec::new(),
            refresh: RefreshTracker::default(),
            on_idle: None,
            on_visible: None,
            on_focused: None,
        }
    }

    pub fn with_config(runtime: R, config: &Config) -> Self {
        let mut hmd = Self::new(runtime, &config.application_name, config.seated);
        hmd.session_config = config.session.clone();
        hmd.debug = config.debug.clone();
        hmd.resolution_override = config.resolution;
        hmd
    }

    /// Connect to the runtime and find the headset.
    ///
    /// Sets the resolution to the runtime's recommendation, unless one was configured.
    pub fn init(&mut self) -> Result<(), HmdError> {
        if self.instance {
            log::warn!("init called twice");
            return Err(HmdError::AlreadyInitialized);
        }
        if self.debug.print_api_layers {
            match self.runtime.api_layers() {
                Ok(layers) => {
                    log::info!("{} API layers available", layers.len());
                    for layer in layers {
                        log::info!(
                            "  {} v{}: {}",
                            layer.name,
                            layer.layer_version,
                            layer.description
                        );
                    }
                }
                Err(e) => log::warn!("cannot enumerate API layers: {e}"),
            }
        }

        let capabilities = self
            .runtime
            .capabilities()
            .check("failed to enumerate runtime extensions")?;
        if self.debug.print_runtime_extensions {
            log::info!("runtime supports {} extensions", capabilities.extensions.len());
            for ext in &capabilities.extensions {
                log::info!("  {ext}");
            }
        }
        if !capabilities.opengl {
            log::error!("runtime does not support the {OPENGL_EXTENSION} extension");
            return Err(HmdError::MissingExtension(OPENGL_EXTENSION));
        }
        if !capabilities.time_conversion {
            log::warn!("runtime can't convert time, missed frames won't be counted");
        }

        self.runtime
            .create_instance(&self.application_name, &capabilities)
            .check("failed to create XR instance")?;
        self.instance = true;

        let runtime = self.runtime.runtime_properties().unwrap_or_else(|e| {
            log::warn!("cannot get runtime properties: {e}");
            RuntimeProperties::default()
        });
        log::info!("runtime: {} {}", runtime.name, runtime.version);

        let system = self
            .runtime
            .system()
            .check("failed to get system for HMD form factor")?;
        log::info!("headset: {} (vendor {:#x})", system.name, system.vendor_id);
        if self.debug.print_system_properties {
            log::info!(
                "  max swapchain size {}x{}, max layers {}",
                system.max_swapchain_width,
                system.max_swapchain_height,
                system.max_layer_count
            );
            log::info!(
                "  orientation tracking: {}, position tracking: {}",
                system.orientation_tracking,
                system.position_tracking
            );
        }

        let views: SmallVec<[ViewDescriptor; 2]> = self
            .runtime
            .view_configuration()
            .check("failed to enumerate view configuration views")?
            .into_iter()
            .collect();
        if views.is_empty() {
            log::error!("runtime reports no views for the stereo view configuration");
            return Err(HmdError::NoViews);
        }
        if self.debug.print_view_configurations {
            for (i, v) in views.iter().enumerate() {
                log::info!(
                    "view {i}: recommended {}x{} ({} samples), max {}x{} ({} samples)",
                    v.recommended_width,
                    v.recommended_height,
                    v.recommended_sample_count,
                    v.max_width,
                    v.max_height,
                    v.max_sample_count
                );
            }
        }

        let requirements = self
            .runtime
            .graphics_requirements()
            .check("failed to get OpenGL graphics requirements")?;
        log::debug!(
            "OpenGL {} to {} supported",
            requirements.min_api_version,
            requirements.max_api_version
        );

        self.views = smallvec![View::default(); views.len()];
        self.connection = Some(Connection {
            capabilities,
            runtime,
            system,
            views,
        });
        self.resolution = self.recommended_resolution();
        if let Some(resolution) = self.resolution_override {
            self.set_resolution(resolution);
        }
        Ok(())
    }

    /// Create a session rendering with `binding`, and wait until it's synchronized with the
    /// headset.
    ///
    /// On failure, whatever was already created stays around until [`Hmd::close_session`] or
    /// [`Hmd::terminate`].
    pub fn start_session(&mut self, binding: &GraphicsBinding) -> Result<(), HmdError> {
        let views = match &self.connection {
            Some(connection) => connection.views.clone(),
            None => return Err(HmdError::NotInitialized),
        };
        if self.session_open {
            return Err(HmdError::SessionActive);
        }
        if self.status == SessionStatus::Failure {
            return Err(HmdError::SessionFailed);
        }
        log::info!(
            "starting session: {}x{}, {} reference space",
            self.resolution.width,
            self.resolution.height,
            self.reference_space.name()
        );
        self.runtime
            .create_session(binding)
            .check("failed to create session")?;
        self.session_open = true;
        self.session = Some(SessionResources::create(
            &mut self.runtime,
            &views,
            self.reference_space,
            self.resolution,
        )?);
        self.synchronize()
    }

    fn synchronize(&mut self) -> Result<(), HmdError> {
        while self.status != SessionStatus::Synchronized {
            match self.pump_events()? {
                Pumped::Events => (),
                Pumped::Nothing => thread::sleep(self.session_config.transition_poll_interval),
                Pumped::PollFailed => {
                    log::error!("cannot read runtime events, giving up on the session");
                    self.status = SessionStatus::Failure;
                    return Err(HmdError::SessionFailed);
                }
            }
            if !self.session_open {
                log::error!("session went away before it was synchronized");
                return Err(HmdError::SessionStopped);
            }
        }
        Ok(())
    }

    /// Handle pending runtime events. Keeps going while a begin or end is in flight.
    ///
    /// Fails if the session ended up in [`SessionStatus::Failure`].
    pub fn poll_events(&mut self) -> Result<(), HmdError> {
        self.pump_events().map(|_| ())
    }

    /// A failed poll ends the round, whatever the status.
    fn pump_events(&mut self) -> Result<Pumped, HmdError> {
        let mut pumped = Pumped::Nothing;
        loop {
            let handled = match self.poll_event() {
                Ok(handled) => handled,
                Err(e) => {
                    log::warn!("failed to poll runtime events: {e}");
                    pumped = Pumped::PollFailed;
                    false
                }
            };
            if handled {
                pumped = Pumped::Events;
            }
            if self.status == SessionStatus::Failure {
                return Err(HmdError::SessionFailed);
            }
            if pumped == Pumped::PollFailed || !self.status.is_transitory() {
                return Ok(pumped);
            }
            if self.status == SessionStatus::Beginning {
                // the runtime waits for a frame before it synchronizes
                self.wait_next_frame()?;
                self.submit_frame()?;
            } else if !handled {
                thread::sleep(self.session_config.transition_poll_interval);
            }
        }
    }

    /// Returns whether an event was handled.
    fn poll_event(&mut self) -> Result<bool, R::Error> {
        let Some(event) = self.runtime.poll_event()? else {
            return Ok(false);
        };
        match event {
            RuntimeEvent::InstanceLossPending { loss_time } => {
                log::warn!("instance loss pending at {loss_time}, releasing the runtime");
                self.release_runtime();
            }
            RuntimeEvent::SessionStateChanged(state) => self.update_session_state(state),
            RuntimeEvent::InteractionProfileChanged => (),
            RuntimeEvent::Other(name) => log::debug!("unhandled event {name}"),
        }
        Ok(true)
    }

    fn update_session_state(&mut self, state: SessionState) {
        log::info!("session state change: '{}' -> '{}'", self.state, state);
        self.state = state;
        let Transition { action, status } = events::transition(self.status, state);
        let result = match action {
            Action::None => Ok(()),
            Action::NotifyIdle => {
                notify(&mut self.on_idle);
                Ok(())
            }
            Action::NotifyVisible => {
                notify(&mut self.on_visible);
                Ok(())
            }
            Action::NotifyFocused => {
                notify(&mut self.on_focused);
                Ok(())
            }
            Action::BeginSession => self
                .runtime
                .begin_session()
                .check("failed to begin session"),
            Action::EndSession => self.runtime.end_session().check("failed to end session"),
            Action::DestroySession => self.destroy_session(),
        };
        self.status = match result {
            Ok(()) => status,
            Err(_) => SessionStatus::Failure,
        };
    }

    fn destroy_session(&mut self) -> Result<(), HmdError> {
        self.session = None;
        self.frame_pending = false;
        if self.session_open {
            self.runtime
                .destroy_session()
                .check("failed to destroy session")?;
            self.session_open = false;
        }
        Ok(())
    }

    /// The runtime is going away: drop the session and the instance.
    fn release_runtime(&mut self) {
        let session = self.destroy_session();
        let instance = self
            .runtime
            .destroy_instance()
            .check("failed to destroy XR instance");
        self.instance = false;
        self.connection = None;
        self.status = if session.is_ok() && instance.is_ok() {
            SessionStatus::Stopped
        } else {
            SessionStatus::Failure
        };
    }

    /// Block until the runtime wants the next frame, and update the eye poses for it.
    pub fn wait_next_frame(&mut self) -> Result<(), HmdError> {
        if !self.session_open {
            return Err(HmdError::NoSession);
        }
        self.frame_state = FrameState::default();
        self.frame_state = self.runtime.wait_frame().check("failed to wait for frame")?;
        self.frame_pending = true;
        let views = self
            .runtime
            .locate_views(self.frame_state.predicted_display_time)
            .check("could not locate views")?;
        for (slot, view) in self.views.iter_mut().zip(views) {
            *slot = view;
        }
        log::trace!(
            "frame at {}, should render: {}",
            self.frame_state.predicted_display_time,
            self.frame_state.should_render
        );
        Ok(())
    }

    /// Whether the runtime wants the waited frame rendered.
    pub fn should_render(&self) -> bool {
        self.frame_state.should_render
    }

    /// Submit a frame with nothing in it.
    pub fn submit_frame(&mut self) -> Result<(), HmdError> {
        if !self.session_open {
            return Err(HmdError::NoSession);
        }
        self.frame_pending = false;
        self.runtime.begin_frame().check("failed to begin frame")?;
        self.runtime
            .end_frame(self.frame_state.predicted_display_time, None)
            .check("failed to end frame")
    }

    /// Render and submit the waited frame.
    ///
    /// `render` is called for each view in order, with the view index and the texture to render
    /// into. The texture goes back to the runtime as soon as `render` returns.
    ///
    /// If acquiring an image fails, the remaining views are skipped, and an empty frame is
    /// submitted in place of the partial one.
    pub fn submit_frame_with(
        &mut self,
        mut render: impl FnMut(usize, u32),
    ) -> Result<(), HmdError> {
        if !self.frame_pending || !self.should_render() {
            return self.submit_frame();
        }
        let Some(session) = self.session.as_ref() else {
            return Err(HmdError::NoSession);
        };
        self.frame_pending = false;
        self.runtime.begin_frame().check("failed to begin frame")?;

        let display_time = self.frame_state.predicted_display_time;
        let timeout = self.session_config.swapchain_wait_timeout;
        let mut layer: SmallVec<[ProjectionView; 2]> = SmallVec::new();
        let mut failed = None;
        for (i, view) in self.views.iter().enumerate() {
            if let Err(e) = render_view(&mut self.runtime, session, i, timeout, &mut render) {
                failed = Some(e);
                break;
            }
            layer.push(session.projection_view(view));
        }

        self.refresh.record(
            display_time,
            self.frame_state.predicted_display_period,
            self.runtime.now().ok(),
            Instant::now(),
        );
        let layer = failed.is_none().then_some(&layer[..]);
        let ended = self
            .runtime
            .end_frame(display_time, layer)
            .check("failed to end frame");
        match failed {
            Some(e) => Err(e),
            None => ended,
        }
    }

    /// Shut the session down, and wait for the runtime to let go of it.
    pub fn close_session(&mut self) -> Result<(), HmdError> {
        if self.status.is_running() && self.status != SessionStatus::Idle {
            if let Err(e) = self
                .runtime
                .request_exit()
                .check("failed to request session exit")
            {
                self.status = SessionStatus::Failure;
                return Err(e);
            }
            while self.status.is_running() {
                match self.pump_events() {
                    Ok(Pumped::Events) => (),
                    Ok(Pumped::Nothing) => {
                        thread::sleep(self.session_config.transition_poll_interval)
                    }
                    Ok(Pumped::PollFailed) => {
                        log::error!("cannot read runtime events, destroying the session");
                        self.status = SessionStatus::Failure;
                    }
                    Err(_) => break,
                }
            }
        }
        if self.session_open {
            // idle, or it never got going
            if let Err(e) = self.destroy_session() {
                self.status = SessionStatus::Failure;
                return Err(e);
            }
            if self.status != SessionStatus::Failure {
                self.status = SessionStatus::Stopped;
            }
        }
        match self.status {
            SessionStatus::Stopped => Ok(()),
            _ => Err(HmdError::SessionFailed),
        }
    }

    /// Close the session if there is one, and disconnect from the runtime.
    pub fn terminate(&mut self) -> Result<(), HmdError> {
        if self.status.is_running() || self.session_open {
            if let Err(e) = self.close_session() {
                log::warn!("closing session failed, destroying the instance anyway: {e}");
            }
        }
        if self.instance {
            if let Err(e) = self
                .runtime
                .destroy_instance()
                .check("failed to destroy instance")
            {
                self.status = SessionStatus::Failure;
                return Err(e);
            }
            self.instance = false;
            self.connection = None;
            self.status = SessionStatus::Stopped;
            self.state = SessionState::Unknown;
        }
        Ok(())
    }

    pub fn is_session_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Last session state the runtime reported.
    pub fn session_state(&self) -> SessionState {
        self.state
    }

    pub fn set_idle_callback(&mut self, f: impl FnMut() + 'static) {
        self.on_idle = Some(Box::new(f));
    }

    pub fn set_visible_callback(&mut self, f: impl FnMut() + 'static) {
        self.on_visible = Some(Box::new(f));
    }

    pub fn set_focused_callback(&mut self, f: impl FnMut() + 'static) {
        self.on_focused = Some(Box::new(f));
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Per eye render resolution of the next session. Ignored while a session is running.
    pub fn set_resolution(&mut self, resolution: Resolution) {
        if self.is_session_running() {
            log::warn!("cannot change resolution while a session is running");
            return;
        }
        self.resolution = resolution;
    }

    pub fn recommended_resolution(&self) -> Resolution {
        self.connection
            .as_ref()
            .and_then(|c| c.views.first())
            .map_or(Resolution::default(), |v| Resolution {
                width: v.recommended_width,
                height: v.recommended_height,
            })
    }

    pub fn view_descriptors(&self) -> &[ViewDescriptor] {
        self.connection.as_ref().map_or(&[], |c| &c.views[..])
    }

    pub fn system_properties(&self) -> Option<&SystemProperties> {
        self.connection.as_ref().map(|c| &c.system)
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.connection.as_ref().map(|c| &c.capabilities)
    }

    pub fn reference_space_type(&self) -> &'static str {
        self.reference_space.name()
    }

    pub fn runtime_name(&self) -> &str {
        self.connection.as_ref().map_or("", |c| &c.runtime.name)
    }

    /// "major.minor.patch", empty when not connected.
    pub fn runtime_version(&self) -> String {
        self.connection
            .as_ref()
            .map_or_else(String::new, |c| c.runtime.version.to_string())
    }

    /// Statistics of the last complete window of frames.
    pub fn refresh_report(&self) -> &FrameRefreshReport {
        self.refresh.last()
    }

    fn view(&self, eye: Eye) -> Option<&View> {
        let view = self.views.get(eye.view_index());
        if view.is_none() {
            log::error!("view for {} eye does not exist", eye.name());
        }
        view
    }

    /// (roll, pitch, yaw) of the eye.
    pub fn pose_orientation(&self, eye: Eye, unit: AngleUnit) -> Vector3<f32> {
        self.view(eye).map_or(Vector3::zeros(), |v| {
            pose::quaternion_to_euler(&v.orientation).map(|a| unit.from_radians(a))
        })
    }

    pub fn pose_quaternion(&self, eye: Eye) -> UnitQuaternion<f32> {
        self.view(eye)
            .map_or(UnitQuaternion::identity(), |v| v.orientation)
    }

    pub fn pose_position(&self, eye: Eye) -> Vector3<f32> {
        self.view(eye).map_or(Vector3::zeros(), |v| v.position)
    }

    /// (left, right, down, up)
    pub fn field_of_view(&self, eye: Eye, unit: AngleUnit) -> Vector4<f32> {
        self.view(eye)
            .map_or(Vector4::zeros(), |v| pose::fov_angles(&v.fov, unit))
    }

    /// Horizontal and vertical field of view, assuming both eyes have the same.
    pub fn hv_field_of_view(&self, unit: AngleUnit) -> Vector2<f32> {
        if self.views.len() < 2 {
            log::error!("no stereo views");
            return Vector2::zeros();
        }
        pose::hv_fov(&self.views[Eye::Left.view_index()].fov, unit)
    }

    pub fn screen_center(&self, eye: Eye) -> Vector2<f32> {
        self.view(eye)
            .map_or(Vector2::zeros(), |v| pose::screen_center(&v.fov))
    }
}

fn notify(callback: &mut Option<Callback>) {
    if let Some(f) = callback {
        f();
    }
}

fn render_view<R: XrRuntime>(
    runtime: &mut R,
    session: &SessionResources,
    view: usize,
    timeout: Duration,
    render: &mut impl FnMut(usize, u32),
) -> Result<(), HmdError> {
    let index = runtime
        .acquire_image(view)
        .check("failed to acquire swapchain image")?;
    runtime
        .wait_image(view, timeout)
        .check("failed to wait for swapchain image")?;
    let image = session.image(view, index);
    if let Some(image) = image {
        render(view, image);
    }
    runtime
        .release_image(view)
        .check("failed to release swapchain image")?;
    image.map(|_| ()).ok_or_else(|| {
        log::error!("runtime acquired image {index} of swapchain {view}, which it never listed");
        HmdError::NoImage { view, index }
    })
}

impl<R: XrRuntime> Drop for Hmd<R> {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            log::error!("failed to shut down headset: {e}");
        }
    }
}
