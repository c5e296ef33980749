//! 离屏帧的最小示例：把一张 render target 清成固定颜色，再回读到 CPU
//!
//! 用法：`rhi-offscreen-readback [config.toml]`

use std::cell::RefCell;
use std::rc::Rc;

use truvis_rhi::config::RhiInitParams;
use truvis_rhi::desc::{
    BeginPassFlags, ClearValues, ColorAttachment, EndFrameFlags, RenderTargetFlags, TextureDesc, TextureFlags,
    TextureFormat, TextureRenderTargetDesc,
};
use truvis_rhi::handles::RenderTarget;
use truvis_rhi::resource_update::{ReadbackData, ReadbackSource, ResourceUpdateBatch};
use truvis_rhi::{Rhi, RhiBackend, create_rhi};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 64;
const CLEAR_COLOR: [f32; 4] = [0.25, 0.5, 0.75, 1.0];

fn main() -> anyhow::Result<()> {
    truvis_crate_tools::init_log::init_log();

    let params = match std::env::args().nth(1) {
        Some(path) => RhiInitParams::from_toml_file(path)?,
        None => RhiInitParams::default(),
    };
    let mut rhi = create_rhi(RhiBackend::Vulkan, params)?;

    let texture = rhi.new_texture(TextureDesc::new_2d(
        TextureFormat::Rgba8,
        WIDTH,
        HEIGHT,
        TextureFlags::RENDER_TARGET | TextureFlags::USED_AS_TRANSFER_SOURCE,
        "offscreen-color",
    ));
    rhi.create_texture(texture)?;

    let target = rhi.new_texture_render_target(TextureRenderTargetDesc {
        color_attachments: vec![ColorAttachment::texture(texture)],
        depth_stencil: None,
        flags: RenderTargetFlags::empty(),
        name: "offscreen-target".to_string(),
    });
    let render_pass = rhi.new_compatible_render_pass_descriptor(RenderTarget::Texture(target))?;
    rhi.set_render_pass_descriptor(RenderTarget::Texture(target), render_pass);
    rhi.create_texture_render_target(target)?;

    let result: Rc<RefCell<Option<ReadbackData>>> = Rc::new(RefCell::new(None));

    let cb = rhi.begin_offscreen_frame()?;
    rhi.debug_mark_begin(cb, "clear-and-read-back");
    rhi.begin_pass(
        cb,
        RenderTarget::Texture(target),
        ClearValues {
            color: CLEAR_COLOR,
            ..Default::default()
        },
        None,
        BeginPassFlags::empty(),
    );
    let mut batch = ResourceUpdateBatch::new();
    let sink = result.clone();
    batch.read_back_texture(
        ReadbackSource::Texture {
            texture,
            layer: 0,
            level: 0,
        },
        Box::new(move |data| {
            *sink.borrow_mut() = Some(data);
        }),
    );
    rhi.end_pass(cb, Some(batch));
    rhi.debug_mark_end(cb);
    // 离屏帧结束时会等待 GPU 完成，回调已经执行
    rhi.end_offscreen_frame(EndFrameFlags::empty())?;

    let readback = result.borrow_mut().take();
    let Some(readback) = readback else {
        anyhow::bail!("readback callback was not invoked");
    };
    anyhow::ensure!(readback.data.len() >= 4, "readback returned {} bytes", readback.data.len());
    log::info!(
        "read back {}x{} {:?}, first pixel: {:?}",
        readback.width,
        readback.height,
        readback.format,
        &readback.data[..4]
    );
    log::info!("{}", rhi.statistics());

    rhi.release_texture_render_target(target);
    rhi.release_render_pass_descriptor(render_pass);
    rhi.release_texture(texture);
    Ok(())
}
