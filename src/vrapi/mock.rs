//! Scripted runtime for driving the headset controller in tests.

use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};

use super::*;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("mock {0} failed")]
pub(crate) struct MockError(pub(crate) &'static str);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    CreateInstance,
    System,
    DestroyInstance,
    CreateSession,
    CreateReferenceSpace(ReferenceSpace),
    CreateSwapchain(SwapchainSpec),
    DestroySession,
    BeginSession,
    EndSession,
    RequestExit,
    WaitFrame,
    LocateViews,
    BeginFrame,
    Acquire(usize),
    Wait(usize),
    Release(usize),
    EndFrame { views: usize },
}

pub(crate) struct MockRuntime {
    pub(crate) calls: Vec<Call>,
    pub(crate) events: VecDeque<RuntimeEvent>,
    /// Events queued once the named call succeeds, consumed on first use.
    reactions: Vec<(&'static str, Vec<RuntimeEvent>)>,
    failing: HashSet<&'static str>,
    pub(crate) capabilities: Capabilities,
    pub(crate) views: Vec<ViewDescriptor>,
    pub(crate) formats: Vec<u32>,
    pub(crate) images_per_swapchain: u32,
    pub(crate) period: i64,
    pub(crate) should_render: bool,
    /// Added to the runtime clock after every frame wait, so frames can be made late.
    pub(crate) lag: i64,
    clock: i64,
    swapchains: usize,
    next_image: Vec<u32>,
}

impl MockRuntime {
    /// A headset with two 1000x1100 views that goes through the usual state changes.
    pub(crate) fn headset() -> Self {
        use SessionState as S;
        let view = ViewDescriptor {
            recommended_width: 1000,
            recommended_height: 1100,
            max_width: 2000,
            max_height: 2200,
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        Self {
            calls: Vec::new(),
            events: VecDeque::new(),
            reactions: vec![
                ("create_session", states(&[S::Idle, S::Ready])),
                ("end_frame", states(&[S::Synchronized, S::Visible, S::Focused])),
                ("request_exit", states(&[S::Visible, S::Synchronized, S::Stopping])),
                ("end_session", states(&[S::Idle, S::Exiting])),
            ],
            failing: HashSet::new(),
            capabilities: Capabilities {
                opengl: true,
                time_conversion: true,
                extensions: vec!["XR_KHR_opengl_enable".into()],
            },
            views: vec![view; 2],
            formats: vec![0x8058, 0x8C43],
            images_per_swapchain: 3,
            period: 11_111_111,
            should_render: true,
            lag: 0,
            clock: 0,
            swapchains: 0,
            next_image: Vec::new(),
        }
    }

    pub(crate) fn fail(&mut self, op: &'static str) {
        self.failing.insert(op);
    }

    pub(crate) fn push_state(&mut self, state: SessionState) {
        self.events.push_back(RuntimeEvent::SessionStateChanged(state));
    }

    /// Drop the scripted reaction to `op`.
    pub(crate) fn silence(&mut self, op: &'static str) {
        self.reactions.retain(|(name, _)| *name != op);
    }

    pub(crate) fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub(crate) fn count_where(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| f(c)).count()
    }

    fn enter(&mut self, op: &'static str, call: Option<Call>) -> Result<(), MockError> {
        if let Some(call) = call {
            self.calls.push(call);
        }
        if self.failing.contains(op) {
            return Err(MockError(op));
        }
        if let Some(pos) = self.reactions.iter().position(|(name, _)| *name == op) {
            let (_, events) = self.reactions.remove(pos);
            self.events.extend(events);
        }
        Ok(())
    }
}

fn states(states: &[SessionState]) -> Vec<RuntimeEvent> {
    states
        .iter()
        .map(|&s| RuntimeEvent::SessionStateChanged(s))
        .collect()
}

impl XrRuntime for MockRuntime {
    type Error = MockError;

    fn api_layers(&self) -> Result<Vec<ApiLayer>, Self::Error> {
        Ok(vec![ApiLayer {
            name: "XR_APILAYER_mock".into(),
            description: "mock layer".into(),
            layer_version: 1,
        }])
    }

    fn capabilities(&self) -> Result<Capabilities, Self::Error> {
        if self.failing.contains("capabilities") {
            return Err(MockError("capabilities"));
        }
        Ok(self.capabilities.clone())
    }

    fn create_instance(&mut self, _: &str, _: &Capabilities) -> Result<(), Self::Error> {
        self.enter("create_instance", Some(Call::CreateInstance))
    }

    fn runtime_properties(&self) -> Result<RuntimeProperties, Self::Error> {
        if self.failing.contains("runtime_properties") {
            return Err(MockError("runtime_properties"));
        }
        Ok(RuntimeProperties {
            name: "Mock Runtime".into(),
            version: Version {
                major: 1,
                minor: 0,
                patch: 34,
            },
        })
    }

    fn system(&mut self) -> Result<SystemProperties, Self::Error> {
        self.enter("system", Some(Call::System))?;
        Ok(SystemProperties {
            name: "Mock HMD".into(),
            vendor_id: 0x28de,
            max_swapchain_width: 4096,
            max_swapchain_height: 4096,
            max_layer_count: 16,
            orientation_tracking: true,
            position_tracking: true,
        })
    }

    fn view_configuration(&self) -> Result<Vec<ViewDescriptor>, Self::Error> {
        if self.failing.contains("view_configuration") {
            return Err(MockError("view_configuration"));
        }
        Ok(self.views.clone())
    }

    fn graphics_requirements(&self) -> Result<GraphicsRequirements, Self::Error> {
        if self.failing.contains("graphics_requirements") {
            return Err(MockError("graphics_requirements"));
        }
        Ok(GraphicsRequirements {
            min_api_version: Version {
                major: 4,
                minor: 0,
                patch: 0,
            },
            max_api_version: Version {
                major: 4,
                minor: 6,
                patch: 0,
            },
        })
    }

    fn destroy_instance(&mut self) -> Result<(), Self::Error> {
        self.enter("destroy_instance", Some(Call::DestroyInstance))
    }

    fn create_session(&mut self, _: &GraphicsBinding) -> Result<(), Self::Error> {
        self.enter("create_session", Some(Call::CreateSession))?;
        self.swapchains = 0;
        self.next_image.clear();
        Ok(())
    }

    fn create_reference_space(&mut self, space: ReferenceSpace) -> Result<(), Self::Error> {
        self.enter(
            "create_reference_space",
            Some(Call::CreateReferenceSpace(space)),
        )
    }

    fn swapchain_formats(&self) -> Result<Vec<u32>, Self::Error> {
        if self.failing.contains("swapchain_formats") {
            return Err(MockError("swapchain_formats"));
        }
        Ok(self.formats.clone())
    }

    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> Result<Vec<u32>, Self::Error> {
        self.enter("create_swapchain", Some(Call::CreateSwapchain(*spec)))?;
        let base = 100 * (self.swapchains as u32 + 1);
        self.swapchains += 1;
        self.next_image.push(0);
        Ok((0..self.images_per_swapchain).map(|i| base + i).collect())
    }

    fn destroy_session(&mut self) -> Result<(), Self::Error> {
        self.enter("destroy_session", Some(Call::DestroySession))
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, Self::Error> {
        self.enter("poll_event", None)?;
        Ok(self.events.pop_front())
    }

    fn begin_session(&mut self) -> Result<(), Self::Error> {
        self.enter("begin_session", Some(Call::BeginSession))
    }

    fn end_session(&mut self) -> Result<(), Self::Error> {
        self.enter("end_session", Some(Call::EndSession))
    }

    fn request_exit(&mut self) -> Result<(), Self::Error> {
        self.enter("request_exit", Some(Call::RequestExit))
    }

    fn wait_frame(&mut self) -> Result<FrameState, Self::Error> {
        self.enter("wait_frame", Some(Call::WaitFrame))?;
        self.clock += self.period;
        let state = FrameState {
            predicted_display_time: self.clock + self.period,
            predicted_display_period: self.period,
            should_render: self.should_render,
        };
        self.clock += self.lag;
        Ok(state)
    }

    fn now(&self) -> Result<i64, Self::Error> {
        if self.failing.contains("now") {
            return Err(MockError("now"));
        }
        Ok(self.clock)
    }

    fn locate_views(&mut self, _: i64) -> Result<Vec<View>, Self::Error> {
        self.enter("locate_views", Some(Call::LocateViews))?;
        let eye = |x: f32| View {
            orientation: UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            position: Vector3::new(x, 1.7, 0.0),
            fov: Fov {
                angle_left: -0.9,
                angle_right: 0.7,
                angle_up: 0.8,
                angle_down: -0.8,
            },
        };
        Ok(vec![eye(-0.032), eye(0.032)])
    }

    fn begin_frame(&mut self) -> Result<(), Self::Error> {
        self.enter("begin_frame", Some(Call::BeginFrame))
    }

    fn acquire_image(&mut self, view: usize) -> Result<u32, Self::Error> {
        self.enter("acquire_image", Some(Call::Acquire(view)))?;
        let next = self.next_image.get_mut(view).ok_or(MockError("acquire_image"))?;
        let index = *next;
        *next = (index + 1) % self.images_per_swapchain;
        Ok(index)
    }

    fn wait_image(&mut self, view: usize, _: Duration) -> Result<(), Self::Error> {
        self.enter("wait_image", Some(Call::Wait(view)))
    }

    fn release_image(&mut self, view: usize) -> Result<(), Self::Error> {
        self.enter("release_image", Some(Call::Release(view)))
    }

    fn end_frame(&mut self, _: i64, views: Option<&[ProjectionView]>) -> Result<(), Self::Error> {
        let views = views.map_or(0, |v| v.len());
        self.enter("end_frame", Some(Call::EndFrame { views }))
    }
}
