use once_cell::sync::OnceCell;

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    fn request() -> Option<GpuContext> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                label: Some("strata3d-device"),
            },
            None,
        ))
        .ok()?;

        Some(GpuContext {
            device,
            queue,
            adapter,
        })
    }
}

static CTX: OnceCell<GpuContext> = OnceCell::new();

/// Shared device/queue for hosts and tests that do not bring their own.
/// Returns `None` when no suitable adapter is present.
pub fn try_ctx() -> Option<&'static GpuContext> {
    if let Some(ctx) = CTX.get() {
        return Some(ctx);
    }
    let built = GpuContext::request()?;
    Some(CTX.get_or_init(|| built))
}

pub fn ctx() -> &'static GpuContext {
    try_ctx().expect("No suitable GPU adapter")
}
