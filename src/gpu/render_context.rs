use std::fmt;

/// Errors that can occur during GPU context initialization.
#[derive(Debug)]
pub enum RenderContextError {
    /// No compatible GPU adapter found.
    AdapterRequest(wgpu::RequestAdapterError),
    /// GPU device request failed (limits or features not met).
    DeviceRequest(wgpu::RequestDeviceError),
    /// The adapter lacks features the renderer depends on.
    MissingFeatures(wgpu::Features),
}

impl fmt::Display for RenderContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterRequest(e) => {
                write!(f, "no compatible GPU adapter found: {e}")
            }
            Self::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            Self::MissingFeatures(features) => {
                write!(f, "adapter does not support {features:?}")
            }
        }
    }
}

impl std::error::Error for RenderContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AdapterRequest(e) => Some(e),
            Self::DeviceRequest(e) => Some(e),
            Self::MissingFeatures(_) => None,
        }
    }
}

/// Features the GPU-driven pipeline cannot run without: indirect draws
/// carry a non-zero `first_instance` per mesh type.
pub const REQUIRED_FEATURES: wgpu::Features =
    wgpu::Features::INDIRECT_FIRST_INSTANCE;

/// Owns the core wgpu resources: device and queue.
pub struct RenderContext {
    /// The wgpu logical device.
    pub device: wgpu::Device,
    /// The wgpu command queue.
    pub queue: wgpu::Queue,
    /// Adapter description, for logging.
    pub adapter_info: Option<wgpu::AdapterInfo>,
}

impl RenderContext {
    /// Create a headless render context on the best available adapter.
    ///
    /// # Errors
    ///
    /// Returns `RenderContextError` if no adapter is found, the adapter
    /// lacks [`REQUIRED_FEATURES`], or the device request fails.
    pub async fn new_headless() -> Result<Self, RenderContextError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::AdapterRequest)?;

        let missing = REQUIRED_FEATURES - adapter.features();
        if !missing.is_empty() {
            return Err(RenderContextError::MissingFeatures(missing));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Primary Device"),
                required_features: REQUIRED_FEATURES,
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::DeviceRequest)?;

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);

        Ok(Self {
            device,
            queue,
            adapter_info: Some(info),
        })
    }

    /// Create a render context from an externally-owned device and queue.
    /// The device must have been created with [`REQUIRED_FEATURES`].
    #[must_use]
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            adapter_info: None,
        }
    }

    /// Create a new command encoder for recording GPU commands.
    pub fn create_encoder(&self) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            })
    }

    /// Finish the encoder and submit its command buffer to the GPU queue.
    pub fn submit(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.queue.submit(std::iter::once(encoder.finish()))
    }
}
