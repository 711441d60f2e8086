use std::{ffi::c_void, fmt, time::Duration};

use nalgebra::{UnitQuaternion, Vector3};
use openxr::{
    ApplicationInfo, CompositionLayerProjection, CompositionLayerProjectionView,
    EnvironmentBlendMode, EventDataBuffer, Extent2Di, Offset2Di, Rect2Di, ReferenceSpaceType,
    SwapchainSubImage, ViewConfigurationType, ViewStateFlags,
};
use serde::Serialize;

use crate::events::{RuntimeEvent, SessionState};

#[cfg(test)]
pub(crate) mod mock;

/// Every call the headset controller makes into the XR runtime.
///
/// Calls are expected in protocol order: instance, system, session, reference space, swapchains,
/// then frames. Implementations don't have to enforce that, the controller does.
pub trait XrRuntime {
    type Error: std::error::Error + Send + Sync + 'static;

    fn api_layers(&self) -> Result<Vec<ApiLayer>, Self::Error>;
    /// Extensions the runtime offers, and whether the ones we care about are among them.
    fn capabilities(&self) -> Result<Capabilities, Self::Error>;
    /// Connect to the runtime, enabling the extensions in `capabilities` we can use.
    fn create_instance(
        &mut self,
        application_name: &str,
        capabilities: &Capabilities,
    ) -> Result<(), Self::Error>;
    fn runtime_properties(&self) -> Result<RuntimeProperties, Self::Error>;
    /// Find the head mounted display.
    fn system(&mut self) -> Result<SystemProperties, Self::Error>;
    /// One descriptor per view of the stereo view configuration.
    fn view_configuration(&self) -> Result<Vec<ViewDescriptor>, Self::Error>;
    /// Must be queried before a session can be created.
    fn graphics_requirements(&self) -> Result<GraphicsRequirements, Self::Error>;
    fn destroy_instance(&mut self) -> Result<(), Self::Error>;

    fn create_session(&mut self, binding: &GraphicsBinding) -> Result<(), Self::Error>;
    fn create_reference_space(&mut self, space: ReferenceSpace) -> Result<(), Self::Error>;
    fn swapchain_formats(&self) -> Result<Vec<u32>, Self::Error>;
    /// Create the swapchain of the next view, in view order. Returns the images the runtime
    /// allocated for it.
    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> Result<Vec<u32>, Self::Error>;
    /// Destroys the session, together with its reference space and swapchains.
    fn destroy_session(&mut self) -> Result<(), Self::Error>;

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, Self::Error>;
    fn begin_session(&mut self) -> Result<(), Self::Error>;
    fn end_session(&mut self) -> Result<(), Self::Error>;
    fn request_exit(&mut self) -> Result<(), Self::Error>;

    /// Blocks until the runtime wants the next frame.
    fn wait_frame(&mut self) -> Result<FrameState, Self::Error>;
    /// Current time of the runtime clock, in nanoseconds.
    fn now(&self) -> Result<i64, Self::Error>;
    fn locate_views(&mut self, display_time: i64) -> Result<Vec<View>, Self::Error>;
    fn begin_frame(&mut self) -> Result<(), Self::Error>;
    /// Returns the index, into the images returned by `create_swapchain`, of the acquired image.
    fn acquire_image(&mut self, view: usize) -> Result<u32, Self::Error>;
    fn wait_image(&mut self, view: usize, timeout: Duration) -> Result<(), Self::Error>;
    fn release_image(&mut self, view: usize) -> Result<(), Self::Error>;
    /// End the frame. With `None` nothing is composited, otherwise a single projection layer made
    /// of `views`, one per swapchain in view order.
    fn end_frame(
        &mut self,
        display_time: i64,
        views: Option<&[ProjectionView]>,
    ) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl From<openxr::Version> for Version {
    fn from(v: openxr::Version) -> Self {
        Self {
            major: v.major(),
            minor: v.minor(),
            patch: v.patch(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ApiLayer {
    pub name: String,
    pub description: String,
    pub layer_version: u32,
}

/// What the runtime can do for us, resolved once before connecting.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Capabilities {
    /// OpenGL graphics binding, required.
    pub opengl: bool,
    /// Conversion from the platform clock to the runtime clock. Without it frame deadlines
    /// can't be checked.
    pub time_conversion: bool,
    pub extensions: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RuntimeProperties {
    pub name: String,
    pub version: Version,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SystemProperties {
    pub name: String,
    pub vendor_id: u32,
    pub max_swapchain_width: u32,
    pub max_swapchain_height: u32,
    pub max_layer_count: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ViewDescriptor {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct GraphicsRequirements {
    pub min_api_version: Version,
    pub max_api_version: Version,
}

/// Handles of the OpenGL context the session renders with.
///
/// These are passed through to the runtime untouched.
#[derive(Clone, Copy, Debug)]
pub enum GraphicsBinding {
    #[cfg(not(windows))]
    Xlib {
        x_display: *mut c_void,
        visual_id: u32,
        glx_fb_config: *mut c_void,
        glx_drawable: u64,
        glx_context: *mut c_void,
    },
    #[cfg(windows)]
    Win32 {
        h_dc: *mut c_void,
        h_glrc: *mut c_void,
    },
}

impl GraphicsBinding {
    fn to_session_create_info(self) -> openxr::opengl::SessionCreateInfo {
        match self {
            #[cfg(not(windows))]
            Self::Xlib {
                x_display,
                visual_id,
                glx_fb_config,
                glx_drawable,
                glx_context,
            } => openxr::opengl::SessionCreateInfo::Xlib {
                x_display: x_display as _,
                visualid: visual_id,
                glx_fb_config: glx_fb_config as _,
                glx_drawable: glx_drawable as _,
                glx_context: glx_context as _,
            },
            #[cfg(windows)]
            Self::Win32 { h_dc, h_glrc } => openxr::opengl::SessionCreateInfo::Windows {
                h_dc: h_dc as _,
                h_glrc: h_glrc as _,
            },
        }
    }
}

/// Origin poses are reported against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReferenceSpace {
    /// Seated, origin at the initial head position.
    Local,
    /// Standing, origin on the floor of the play area.
    Stage,
}

impl ReferenceSpace {
    pub fn from_seated(seated: bool) -> Self {
        if seated {
            Self::Local
        } else {
            Self::Stage
        }
    }
    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Stage => "STAGE",
        }
    }
    fn to_xr(self) -> ReferenceSpaceType {
        match self {
            Self::Local => ReferenceSpaceType::LOCAL,
            Self::Stage => ReferenceSpaceType::STAGE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainSpec {
    pub format: u32,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameState {
    /// Nanoseconds, runtime clock.
    pub predicted_display_time: i64,
    pub predicted_display_period: i64,
    pub should_render: bool,
}

/// Field of view angles in radians. Left and down are usually negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct View {
    pub orientation: UnitQuaternion<f32>,
    pub position: Vector3<f32>,
    pub fov: Fov,
}

impl Default for View {
    fn default() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
            fov: Fov::default(),
        }
    }
}

/// One eye's contribution to the projection layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionView {
    pub view: View,
    pub width: u32,
    pub height: u32,
}

fn posef_to_view(pose: openxr::Posef, fov: openxr::Fovf) -> View {
    let orientation = UnitQuaternion::new_normalize(nalgebra::Quaternion::new(
        pose.orientation.w,
        pose.orientation.x,
        pose.orientation.y,
        pose.orientation.z,
    ));
    View {
        orientation,
        position: [pose.position.x, pose.position.y, pose.position.z].into(),
        fov: Fov {
            angle_left: fov.angle_left,
            angle_right: fov.angle_right,
            angle_up: fov.angle_up,
            angle_down: fov.angle_down,
        },
    }
}

fn view_to_posef(view: &View) -> (openxr::Posef, openxr::Fovf) {
    let q = &view.orientation.as_ref().coords;
    let pose = openxr::Posef {
        orientation: openxr::Quaternionf {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        },
        position: openxr::Vector3f {
            x: view.position.x,
            y: view.position.y,
            z: view.position.z,
        },
    };
    let fov = openxr::Fovf {
        angle_left: view.fov.angle_left,
        angle_right: view.fov.angle_right,
        angle_up: view.fov.angle_up,
        angle_down: view.fov.angle_down,
    };
    (pose, fov)
}

/// Extension behind `Instance::now` on this platform.
#[cfg(not(windows))]
const TIME_CONVERSION_EXTENSION: &str = "XR_KHR_convert_timespec_time";
#[cfg(windows)]
const TIME_CONVERSION_EXTENSION: &str = "XR_KHR_win32_convert_performance_counter_time";

#[cfg(not(windows))]
fn time_conversion(extensions: &mut openxr::ExtensionSet) -> &mut bool {
    &mut extensions.khr_convert_timespec_time
}

#[cfg(windows)]
fn time_conversion(extensions: &mut openxr::ExtensionSet) -> &mut bool {
    &mut extensions.khr_win32_convert_performance_counter_time
}

/// The whole of a `width` x `height` image.
fn image_rect(width: u32, height: u32) -> Rect2Di {
    Rect2Di {
        offset: Offset2Di { x: 0, y: 0 },
        extent: Extent2Di {
            width: i32::try_from(width).unwrap_or(i32::MAX),
            height: i32::try_from(height).unwrap_or(i32::MAX),
        },
    }
}

/// Result of `xrWaitSwapchainImage`. Running out of time is a success code, not an error.
fn wait_image_result(result: openxr::sys::Result) -> Result<(), OpenXrError> {
    if result.into_raw() < 0 {
        return Err(result.into());
    }
    if result == openxr::sys::Result::TIMEOUT_EXPIRED {
        return Err(OpenXrError::ImageWaitTimeout);
    }
    Ok(())
}

fn session_state_from_xr(state: openxr::SessionState) -> SessionState {
    use openxr::SessionState as S;
    match state {
        S::IDLE => SessionState::Idle,
        S::READY => SessionState::Ready,
        S::SYNCHRONIZED => SessionState::Synchronized,
        S::VISIBLE => SessionState::Visible,
        S::FOCUSED => SessionState::Focused,
        S::STOPPING => SessionState::Stopping,
        S::LOSS_PENDING => SessionState::LossPending,
        S::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenXrError {
    #[error("cannot load openxr loader: {0}")]
    XrLoad(#[from] openxr::LoadError),
    #[error("xr: {0}")]
    Xr(#[from] openxr::sys::Result),
    #[error("not connected to a runtime")]
    NotConnected,
    #[error("no session")]
    NoSession,
    #[error("no reference space")]
    NoReferenceSpace,
    #[error("no swapchain for view {0}")]
    NoSwapchain(usize),
    #[error("timed out waiting for swapchain image")]
    ImageWaitTimeout,
    #[error("time conversion extension not enabled")]
    NoTimeConversion,
}

struct XrSession {
    swapchains: Vec<openxr::Swapchain<openxr::OpenGL>>,
    space: Option<openxr::Space>,
    frame_stream: openxr::FrameStream<openxr::OpenGL>,
    frame_waiter: openxr::FrameWaiter,
    session: openxr::Session<openxr::OpenGL>,
}

/// The OpenXR loader, rendering with OpenGL.
pub struct OpenXr {
    session: Option<XrSession>,
    system: Option<openxr::SystemId>,
    instance: Option<openxr::Instance>,
    entry: openxr::Entry,
    event_buffer: EventDataBuffer,
    time_conversion: bool,
}

impl OpenXr {
    pub fn new() -> Result<Self, OpenXrError> {
        let entry = unsafe { openxr::Entry::load()? };
        Ok(Self {
            session: None,
            system: None,
            instance: None,
            entry,
            event_buffer: EventDataBuffer::default(),
            time_conversion: false,
        })
    }

    fn instance(&self) -> Result<&openxr::Instance, OpenXrError> {
        self.instance.as_ref().ok_or(OpenXrError::NotConnected)
    }

    fn system_id(&self) -> Result<openxr::SystemId, OpenXrError> {
        self.system.ok_or(OpenXrError::NotConnected)
    }

    fn session(&self) -> Result<&XrSession, OpenXrError> {
        self.session.as_ref().ok_or(OpenXrError::NoSession)
    }

    fn session_mut(&mut self) -> Result<&mut XrSession, OpenXrError> {
        self.session.as_mut().ok_or(OpenXrError::NoSession)
    }

    fn swapchain(&self, view: usize) -> Result<&openxr::Swapchain<openxr::OpenGL>, OpenXrError> {
        self.session()?
            .swapchains
            .get(view)
            .ok_or(OpenXrError::NoSwapchain(view))
    }

    fn swapchain_mut(
        &mut self,
        view: usize,
    ) -> Result<&mut openxr::Swapchain<openxr::OpenGL>, OpenXrError> {
        self.session_mut()?
            .swapchains
            .get_mut(view)
            .ok_or(OpenXrError::NoSwapchain(view))
    }
}

impl XrRuntime for OpenXr {
    type Error = OpenXrError;

    fn api_layers(&self) -> Result<Vec<ApiLayer>, Self::Error> {
        Ok(self
            .entry
            .enumerate_layers()?
            .into_iter()
            .map(|layer| ApiLayer {
                name: layer.layer_name,
                description: layer.description,
                layer_version: layer.layer_version,
            })
            .collect())
    }

    fn capabilities(&self) -> Result<Capabilities, Self::Error> {
        let mut available = self.entry.enumerate_extensions()?;
        let time_conversion = *time_conversion(&mut available);
        let mut extensions = Vec::new();
        for (present, name) in [
            (available.khr_opengl_enable, "XR_KHR_opengl_enable"),
            (time_conversion, TIME_CONVERSION_EXTENSION),
        ] {
            if present {
                extensions.push(name.to_owned());
            }
        }
        extensions.extend(available.other.iter().cloned());
        Ok(Capabilities {
            opengl: available.khr_opengl_enable,
            time_conversion,
            extensions,
        })
    }

    fn create_instance(
        &mut self,
        application_name: &str,
        capabilities: &Capabilities,
    ) -> Result<(), Self::Error> {
        let mut extensions = openxr::ExtensionSet::default();
        extensions.khr_opengl_enable = true;
        *time_conversion(&mut extensions) = capabilities.time_conversion;
        let instance = self.entry.create_instance(
            &ApplicationInfo {
                application_name,
                application_version: 1,
                engine_name: "",
                engine_version: 0,
            },
            &extensions,
            &[],
        )?;
        self.instance = Some(instance);
        self.time_conversion = capabilities.time_conversion;
        Ok(())
    }

    fn runtime_properties(&self) -> Result<RuntimeProperties, Self::Error> {
        let properties = self.instance()?.properties()?;
        Ok(RuntimeProperties {
            name: properties.runtime_name,
            version: properties.runtime_version.into(),
        })
    }

    fn system(&mut self) -> Result<SystemProperties, Self::Error> {
        let instance = self.instance()?;
        let system = instance.system(openxr::FormFactor::HEAD_MOUNTED_DISPLAY)?;
        let properties = instance.system_properties(system)?;
        self.system = Some(system);
        Ok(SystemProperties {
            name: properties.system_name,
            vendor_id: properties.vendor_id,
            max_swapchain_width: properties.graphics_properties.max_swapchain_image_width,
            max_swapchain_height: properties.graphics_properties.max_swapchain_image_height,
            max_layer_count: properties.graphics_properties.max_layer_count,
            orientation_tracking: properties.tracking_properties.orientation_tracking,
            position_tracking: properties.tracking_properties.position_tracking,
        })
    }

    fn view_configuration(&self) -> Result<Vec<ViewDescriptor>, Self::Error> {
        let views = self.instance()?.enumerate_view_configuration_views(
            self.system_id()?,
            ViewConfigurationType::PRIMARY_STEREO,
        )?;
        Ok(views
            .into_iter()
            .map(|v| ViewDescriptor {
                recommended_width: v.recommended_image_rect_width,
                recommended_height: v.recommended_image_rect_height,
                max_width: v.max_image_rect_width,
                max_height: v.max_image_rect_height,
                recommended_sample_count: v.recommended_swapchain_sample_count,
                max_sample_count: v.max_swapchain_sample_count,
            })
            .collect())
    }

    fn graphics_requirements(&self) -> Result<GraphicsRequirements, Self::Error> {
        let requirements = self
            .instance()?
            .graphics_requirements::<openxr::OpenGL>(self.system_id()?)?;
        Ok(GraphicsRequirements {
            min_api_version: requirements.min_api_version_supported.into(),
            max_api_version: requirements.max_api_version_supported.into(),
        })
    }

    fn destroy_instance(&mut self) -> Result<(), Self::Error> {
        self.session = None;
        self.system = None;
        self.instance.take().ok_or(OpenXrError::NotConnected)?;
        Ok(())
    }

    fn create_session(&mut self, binding: &GraphicsBinding) -> Result<(), Self::Error> {
        let info = binding.to_session_create_info();
        let (session, frame_waiter, frame_stream) = unsafe {
            self.instance()?
                .create_session::<openxr::OpenGL>(self.system_id()?, &info)?
        };
        self.session = Some(XrSession {
            swapchains: Vec::new(),
            space: None,
            frame_stream,
            frame_waiter,
            session,
        });
        Ok(())
    }

    fn create_reference_space(&mut self, space: ReferenceSpace) -> Result<(), Self::Error> {
        let session = self.session_mut()?;
        session.space = Some(
            session
                .session
                .create_reference_space(space.to_xr(), openxr::Posef::IDENTITY)?,
        );
        Ok(())
    }

    fn swapchain_formats(&self) -> Result<Vec<u32>, Self::Error> {
        Ok(self.session()?.session.enumerate_swapchain_formats()?)
    }

    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> Result<Vec<u32>, Self::Error> {
        let session = self.session_mut()?;
        let swapchain = session
            .session
            .create_swapchain(&openxr::SwapchainCreateInfo {
                create_flags: Default::default(),
                usage_flags: openxr::SwapchainUsageFlags::SAMPLED
                    | openxr::SwapchainUsageFlags::COLOR_ATTACHMENT,
                format: spec.format,
                sample_count: spec.sample_count,
                width: spec.width,
                height: spec.height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            })?;
        let images = swapchain.enumerate_images()?;
        session.swapchains.push(swapchain);
        Ok(images)
    }

    fn destroy_session(&mut self) -> Result<(), Self::Error> {
        self.session.take().ok_or(OpenXrError::NoSession)?;
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, Self::Error> {
        use openxr::Event as XrEvent;
        let instance = self.instance.as_ref().ok_or(OpenXrError::NotConnected)?;
        let Some(event) = instance.poll_event(&mut self.event_buffer)? else {
            return Ok(None);
        };
        Ok(Some(match event {
            XrEvent::SessionStateChanged(e) => {
                RuntimeEvent::SessionStateChanged(session_state_from_xr(e.state()))
            }
            XrEvent::InstanceLossPending(e) => RuntimeEvent::InstanceLossPending {
                loss_time: e.loss_time().as_nanos(),
            },
            XrEvent::InteractionProfileChanged(_) => RuntimeEvent::InteractionProfileChanged,
            XrEvent::EventsLost(_) => RuntimeEvent::Other("EVENTS_LOST"),
            XrEvent::ReferenceSpaceChangePending(_) => {
                RuntimeEvent::Other("REFERENCE_SPACE_CHANGE_PENDING")
            }
            _ => RuntimeEvent::Other("UNKNOWN"),
        }))
    }

    fn begin_session(&mut self) -> Result<(), Self::Error> {
        self.session()?
            .session
            .begin(ViewConfigurationType::PRIMARY_STEREO)?;
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), Self::Error> {
        self.session()?.session.end()?;
        Ok(())
    }

    fn request_exit(&mut self) -> Result<(), Self::Error> {
        self.session()?.session.request_exit()?;
        Ok(())
    }

    fn wait_frame(&mut self) -> Result<FrameState, Self::Error> {
        let state = self.session_mut()?.frame_waiter.wait()?;
        Ok(FrameState {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            predicted_display_period: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn now(&self) -> Result<i64, Self::Error> {
        let instance = self.instance()?;
        if !self.time_conversion {
            return Err(OpenXrError::NoTimeConversion);
        }
        Ok(instance.now()?.as_nanos())
    }

    fn locate_views(&mut self, display_time: i64) -> Result<Vec<View>, Self::Error> {
        let session = self.session()?;
        let space = session.space.as_ref().ok_or(OpenXrError::NoReferenceSpace)?;
        let (flags, views) = session.session.locate_views(
            ViewConfigurationType::PRIMARY_STEREO,
            openxr::Time::from_nanos(display_time),
            space,
        )?;
        if !flags.contains(ViewStateFlags::ORIENTATION_VALID | ViewStateFlags::POSITION_VALID) {
            log::trace!("view_state_flags: {:?}", flags);
        }
        Ok(views
            .into_iter()
            .map(|v| posef_to_view(v.pose, v.fov))
            .collect())
    }

    fn begin_frame(&mut self) -> Result<(), Self::Error> {
        self.session_mut()?.frame_stream.begin()?;
        Ok(())
    }

    fn acquire_image(&mut self, view: usize) -> Result<u32, Self::Error> {
        Ok(self.swapchain_mut(view)?.acquire_image()?)
    }

    fn wait_image(&mut self, view: usize, timeout: Duration) -> Result<(), Self::Error> {
        // The safe wrapper reports an expired timeout as success, so go through the raw call.
        let instance = self.instance()?;
        let swapchain = self.swapchain(view)?;
        let info = openxr::sys::SwapchainImageWaitInfo {
            ty: openxr::sys::SwapchainImageWaitInfo::TYPE,
            next: std::ptr::null(),
            timeout: openxr::Duration::from_nanos(
                i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX),
            ),
        };
        wait_image_result(unsafe {
            (instance.fp().wait_swapchain_image)(swapchain.as_raw(), &info)
        })
    }

    fn release_image(&mut self, view: usize) -> Result<(), Self::Error> {
        self.swapchain_mut(view)?.release_image()?;
        Ok(())
    }

    fn end_frame(
        &mut self,
        display_time: i64,
        views: Option<&[ProjectionView]>,
    ) -> Result<(), Self::Error> {
        let session = self.session_mut()?;
        let display_time = openxr::Time::from_nanos(display_time);
        let Some(views) = views.filter(|views| !views.is_empty()) else {
            session
                .frame_stream
                .end(display_time, EnvironmentBlendMode::OPAQUE, &[])?;
            return Ok(());
        };
        let space = session.space.as_ref().ok_or(OpenXrError::NoReferenceSpace)?;
        let projection_views = views
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let swapchain = session
                    .swapchains
                    .get(i)
                    .ok_or(OpenXrError::NoSwapchain(i))?;
                let (pose, fov) = view_to_posef(&v.view);
                Ok(CompositionLayerProjectionView::new()
                    .pose(pose)
                    .fov(fov)
                    .sub_image(
                        SwapchainSubImage::new()
                            .swapchain(swapchain)
                            .image_array_index(0)
                            .image_rect(image_rect(v.width, v.height)),
                    ))
            })
            .collect::<Result<Vec<_>, OpenXrError>>()?;
        let layer = CompositionLayerProjection::new()
            .space(space)
            .views(&projection_views);
        session
            .frame_stream
            .end(display_time, EnvironmentBlendMode::OPAQUE, &[&layer])?;
        Ok(())
    }
}
