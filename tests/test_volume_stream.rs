// End-to-end volume streaming: slice fetches feeding a tile atlas, the
// revision guard against stale completions, and the per-frame draw list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Mat4;
use strata3d::source::{SliceData, SliceRequest, SliceTransport};
use strata3d::{
    FrameParams, TextureState, TileGrid, TileKey, TileSet, ViewParams, VolumeError, VolumeExtent,
    VolumeResult, VolumeSource, VolumeView,
};

/// Transport that resolves on the calling thread, encoding the requested z
/// in the payload so the decoder can reconstruct it.
#[derive(Default)]
struct InlineTransport {
    requests: AtomicU64,
}

impl SliceTransport for InlineTransport {
    fn fetch(&self, request: SliceRequest, done: Box<dyn FnOnce(VolumeResult<Vec<u8>>) + Send>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        done(Ok(request.z.to_le_bytes().to_vec()));
    }
}

fn test_grid() -> TileGrid {
    TileGrid {
        extent: VolumeExtent::new(0.0, 0.0, 0.0, 10.0, 10.0, 100.0),
        srs: "EPSG:4326".to_string(),
        num_root_tiles: [1, 1, 1],
        tile_size: [2, 2],
    }
}

fn make_source(grid: TileGrid, transport: Arc<InlineTransport>) -> VolumeSource {
    let requests = Arc::new(|_key: TileKey, extent: &VolumeExtent| {
        (0..5)
            .map(|i| SliceRequest {
                z: extent.min_z + i as f64 * 25.0,
                url: format!("http://volume.test/slice/{}", i),
                post_data: None,
            })
            .collect::<Vec<_>>()
    });
    let decoder = Arc::new(|bytes: &[u8]| -> VolumeResult<SliceData> {
        let z = f64::from_le_bytes(bytes.try_into().expect("8-byte payload"));
        Ok(SliceData::F32 {
            width: 2,
            height: 2,
            values: vec![z as f32; 4],
        })
    });
    VolumeSource::new(grid, requests, Some(decoder), transport)
}

fn stack_tileset(device: &wgpu::Device, queue: &wgpu::Queue, num_slices: u32) -> TileSet {
    let view = VolumeView::create(
        "stack",
        ViewParams {
            num_slices: Some(num_slices),
            ..Default::default()
        },
    )
    .unwrap();
    TileSet::new(
        device,
        queue,
        "EPSG:4326",
        view,
        wgpu::TextureFormat::Rgba8Unorm,
        None,
    )
}

fn frame() -> FrameParams {
    FrameParams {
        view_proj: Mat4::IDENTITY,
    }
}

#[test]
fn volume_streams_into_ready_atlas_and_five_draws() {
    let Some(ctx) = strata3d::gpu::try_ctx() else {
        eprintln!("Skipping volume stream test: no adapter");
        return;
    };
    let (device, queue) = (&ctx.device, &ctx.queue);

    let transport = Arc::new(InlineTransport::default());
    let mut set = stack_tileset(device, queue, 5);
    set.set_source(Some(make_source(test_grid(), transport.clone())))
        .unwrap();

    // First traversal builds resources and kicks loads; the synchronous
    // completions land in the channel and are drained next frame.
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.tiles, 1);
    assert_eq!(stats.slices_applied, 0);
    assert_eq!(stats.textures_ready, 0);
    assert_eq!(transport.requests.load(Ordering::Relaxed), 5);

    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.slices_applied, 5);
    assert_eq!(stats.slices_stale, 0);
    assert_eq!(stats.textures_ready, 1);
    assert_eq!(stats.draw_commands, 5);

    let tile = &set.tiles()[0];
    let texture = tile.texture.as_ref().unwrap();
    assert_eq!(texture.state(), TextureState::Ready);
    let layout = texture.layout().unwrap();
    assert_eq!((layout.cols, layout.rows), (2, 3));

    // Unchanged source revision: the texture is reused, no load re-kicked.
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.slices_applied, 0);
    assert_eq!(stats.textures_ready, 1);
    assert_eq!(transport.requests.load(Ordering::Relaxed), 5);

    // Encode the draw list once to exercise the pipeline end to end.
    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("volume-stream-test-target"),
        size: wgpu::Extent3d {
            width: 16,
            height: 16,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = target.create_view(&wgpu::TextureViewDescriptor::default());
    let mut encoder =
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("volume-stream-test-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        set.render(&mut pass);
    }
    queue.submit([encoder.finish()]);
}

#[test]
fn stale_slices_from_old_source_are_discarded() {
    let Some(ctx) = strata3d::gpu::try_ctx() else {
        eprintln!("Skipping epoch guard test: no adapter");
        return;
    };
    let (device, queue) = (&ctx.device, &ctx.queue);

    let transport = Arc::new(InlineTransport::default());
    let mut set = stack_tileset(device, queue, 5);
    set.set_source(Some(make_source(test_grid(), transport.clone())))
        .unwrap();

    // Kick the first load; its five completions are now queued.
    set.update(device, queue, &frame());

    // Source swap bumps the revision before the completions are drained.
    set.set_source(Some(make_source(test_grid(), transport.clone())))
        .unwrap();

    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.slices_stale, 5);
    assert_eq!(stats.slices_applied, 0);

    // The new source's own slices apply normally on the following frame.
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.slices_stale, 0);
    assert_eq!(stats.slices_applied, 5);
    assert_eq!(stats.textures_ready, 1);
}

#[test]
fn slice_view_produces_one_concatenated_draw() {
    let Some(ctx) = strata3d::gpu::try_ctx() else {
        eprintln!("Skipping slice view test: no adapter");
        return;
    };
    let (device, queue) = (&ctx.device, &ctx.queue);

    let transport = Arc::new(InlineTransport::default());
    let mut set = stack_tileset(device, queue, 5);
    set.set_source(Some(make_source(test_grid(), transport)))
        .unwrap();
    set.set_view_mode(
        "slice",
        ViewParams {
            x: Some(5.0),
            y: Some(5.0),
            z: Some(50.0),
            ..Default::default()
        },
    )
    .unwrap();

    set.update(device, queue, &frame());
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.draw_commands, 1);

    // All three coordinates out of range: the tile has no geometry at all.
    match set.view_mut() {
        VolumeView::Slice(v) => {
            v.set_x(Some(-1.0));
            v.set_y(Some(11.0));
            v.set_z(Some(200.0));
        }
        _ => unreachable!(),
    }
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.draw_commands, 0);
}

#[test]
fn swapping_view_strategy_rebuilds_on_next_traversal() {
    let Some(ctx) = strata3d::gpu::try_ctx() else {
        eprintln!("Skipping view swap test: no adapter");
        return;
    };
    let (device, queue) = (&ctx.device, &ctx.queue);

    let transport = Arc::new(InlineTransport::default());
    let mut set = stack_tileset(device, queue, 3);
    set.set_source(Some(make_source(test_grid(), transport)))
        .unwrap();

    set.update(device, queue, &frame());
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.draw_commands, 3);

    set.set_view(
        VolumeView::create(
            "stack",
            ViewParams {
                num_slices: Some(7),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.draw_commands, 7);

    // Vertical exaggeration changes geometry, so it rebuilds too.
    set.set_vertical_scale(2.0);
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.draw_commands, 7);
}

#[test]
fn mismatched_slice_dimensions_never_reach_the_atlas() {
    let Some(ctx) = strata3d::gpu::try_ctx() else {
        eprintln!("Skipping slice mismatch test: no adapter");
        return;
    };
    let (device, queue) = (&ctx.device, &ctx.queue);

    let transport = Arc::new(InlineTransport::default());
    let requests = Arc::new(|_key: TileKey, extent: &VolumeExtent| {
        vec![SliceRequest {
            z: extent.min_z,
            url: "http://volume.test/slice/0".to_string(),
            post_data: None,
        }]
    });
    // The grid expects 2x2 slices; this decoder produces 3x3.
    let decoder = Arc::new(|_bytes: &[u8]| -> VolumeResult<SliceData> {
        Ok(SliceData::F32 {
            width: 3,
            height: 3,
            values: vec![0.0; 9],
        })
    });
    let source = VolumeSource::new(test_grid(), requests, Some(decoder), transport);

    let mut set = stack_tileset(device, queue, 5);
    set.set_source(Some(source)).unwrap();

    set.update(device, queue, &frame());
    let stats = set.update(device, queue, &frame());
    assert_eq!(stats.slices_applied, 0);
    assert_eq!(stats.draw_commands, 0);
    let texture = set.tiles()[0].texture.as_ref().unwrap();
    assert_eq!(texture.state(), TextureState::Unallocated);
}

#[test]
fn malformed_grid_fails_fast_and_preserves_tiles() {
    let Some(ctx) = strata3d::gpu::try_ctx() else {
        eprintln!("Skipping grid validation test: no adapter");
        return;
    };
    let (device, queue) = (&ctx.device, &ctx.queue);

    let transport = Arc::new(InlineTransport::default());
    let mut set = stack_tileset(device, queue, 5);
    set.set_source(Some(make_source(test_grid(), transport.clone())))
        .unwrap();
    assert_eq!(set.tiles().len(), 1);

    let mut bad = test_grid();
    bad.extent.max_x = bad.extent.min_x;
    let err = set
        .set_source(Some(make_source(bad, transport)))
        .unwrap_err();
    assert!(matches!(err, VolumeError::InvalidGrid(_)));
    assert_eq!(set.tiles().len(), 1);
}

#[cfg(not(feature = "proj"))]
#[test]
fn unsupported_srs_pair_fails_tileset_construction() {
    let Some(ctx) = strata3d::gpu::try_ctx() else {
        eprintln!("Skipping SRS test: no adapter");
        return;
    };
    let (device, queue) = (&ctx.device, &ctx.queue);

    let transport = Arc::new(InlineTransport::default());
    let mut set = stack_tileset(device, queue, 5);
    let mut grid = test_grid();
    grid.srs = "EPSG:3857".to_string();
    let err = set
        .set_source(Some(make_source(grid, transport)))
        .unwrap_err();
    assert!(matches!(err, VolumeError::Projection(_)));
    assert!(set.tiles().is_empty());
}
