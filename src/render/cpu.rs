use std::sync::Arc;

use crate::assets::decode::Bitmap;
use crate::entity::{AnimationEntity, DynamicEntity};
use crate::foundation::core::{Affine, BezPath, PixelSize, Rect, Rgba8};
use crate::foundation::error::{SvgaError, SvgaResult};
use crate::format::movie::{FramePose, LineCap, LineJoin, Shape, ShapeStyle, SpriteTimeline};
use crate::render::scale::{ScalePolicy, content_transform};

/// Paints one movie frame into a pixmap with `vello_cpu`.
///
/// Holds a reusable render context plus two scratch pixmaps for matte compositing. One renderer
/// serves one thread at a time.
#[derive(Default)]
pub struct FrameRenderer {
    ctx: Option<vello_cpu::RenderContext>,
    layer: Option<vello_cpu::Pixmap>,
    mask: Option<vello_cpu::Pixmap>,
}

/// Consecutive sprites that composite together.
enum Segment<'a> {
    Plain(Vec<&'a SpriteTimeline>),
    Matted {
        matte: &'a SpriteTimeline,
        members: Vec<&'a SpriteTimeline>,
    },
}

struct Scene<'a> {
    entity: &'a AnimationEntity,
    dynamic: Option<&'a DynamicEntity>,
    frame: u32,
    base: Affine,
}

impl FrameRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear `target` and draw `frame` of `entity` scaled per `policy`.
    #[tracing::instrument(level = "trace", skip(self, target, entity, dynamic))]
    pub fn render(
        &mut self,
        target: &mut vello_cpu::Pixmap,
        entity: &AnimationEntity,
        frame: u32,
        policy: ScalePolicy,
        dynamic: Option<&DynamicEntity>,
    ) -> SvgaResult<()> {
        if frame >= entity.frames() {
            return Err(SvgaError::validation(format!(
                "frame {frame} out of range (movie has {})",
                entity.frames()
            )));
        }
        clear_pixmap_to_transparent(target);

        let (w, h) = (target.width(), target.height());
        let size = PixelSize {
            width: u32::from(w),
            height: u32::from(h),
        };
        let Some(base) = content_transform(entity.view_box(), size, policy) else {
            tracing::debug!("degenerate canvas; frame left blank");
            return Ok(());
        };

        let sprites = entity.sprites();
        let scene = Scene {
            entity,
            dynamic,
            frame,
            base,
        };
        let segments = scene.segments(&sprites);

        match segments.as_slice() {
            [] => Ok(()),
            [Segment::Plain(list)] => self.draw_into(target, |ctx| scene.draw_list(ctx, list)),
            _ => {
                for segment in &segments {
                    let mut layer = take_scratch(&mut self.layer, w, h);
                    let drawn = self.draw_segment(&scene, segment, &mut layer);
                    if drawn.is_ok() {
                        over_in_place(target.data_as_u8_slice_mut(), layer.data_as_u8_slice());
                    }
                    self.layer = Some(layer);
                    drawn?;
                }
                Ok(())
            }
        }
    }

    fn draw_segment(
        &mut self,
        scene: &Scene<'_>,
        segment: &Segment<'_>,
        layer: &mut vello_cpu::Pixmap,
    ) -> SvgaResult<()> {
        match segment {
            Segment::Plain(list) => self.draw_into(layer, |ctx| scene.draw_list(ctx, list)),
            Segment::Matted { matte, members } => {
                self.draw_into(layer, |ctx| scene.draw_list(ctx, members))?;

                let mut mask = take_scratch(&mut self.mask, layer.width(), layer.height());
                let drawn = self.draw_into(&mut mask, |ctx| scene.draw_matte(ctx, matte));
                if drawn.is_ok() {
                    mask_in_place(layer.data_as_u8_slice_mut(), mask.data_as_u8_slice());
                }
                self.mask = Some(mask);
                drawn
            }
        }
    }

    fn with_ctx_mut<R>(
        &mut self,
        width: u16,
        height: u16,
        f: impl FnOnce(&mut vello_cpu::RenderContext) -> SvgaResult<R>,
    ) -> SvgaResult<R> {
        let mut ctx = match self.ctx.take() {
            None => vello_cpu::RenderContext::new(width, height),
            Some(ctx) if ctx.width() == width && ctx.height() == height => ctx,
            Some(_) => vello_cpu::RenderContext::new(width, height),
        };
        ctx.reset();
        let out = f(&mut ctx);
        self.ctx = Some(ctx);
        out
    }

    fn draw_into(
        &mut self,
        dst: &mut vello_cpu::Pixmap,
        f: impl FnOnce(&mut vello_cpu::RenderContext) -> SvgaResult<()>,
    ) -> SvgaResult<()> {
        self.with_ctx_mut(dst.width(), dst.height(), |ctx| {
            f(ctx)?;
            ctx.flush();
            ctx.render_to_pixmap(dst);
            Ok(())
        })
    }
}

impl<'a> Scene<'a> {
    fn is_hidden(&self, sprite: &SpriteTimeline) -> bool {
        self.dynamic.is_some_and(|d| {
            d.is_hidden(&sprite.image_key) || d.is_hidden(sprite.bitmap_key())
        })
    }

    /// Split visible sprites into runs; matte sprites only appear as masks.
    fn segments(&self, sprites: &'a [SpriteTimeline]) -> Vec<Segment<'a>> {
        let mut out: Vec<Segment<'a>> = Vec::new();
        for sprite in sprites {
            if sprite.is_matte() || self.is_hidden(sprite) {
                continue;
            }
            let Some(pose) = sprite.pose(self.frame) else {
                continue;
            };
            if pose.alpha <= 0.0 {
                continue;
            }

            let matte = sprite
                .matte_key
                .as_deref()
                .and_then(|k| sprites.iter().find(|s| s.image_key == k));
            match (matte, out.last_mut()) {
                (None, Some(Segment::Plain(list))) => list.push(sprite),
                (None, _) => out.push(Segment::Plain(vec![sprite])),
                (Some(m), Some(Segment::Matted { matte, members })) if std::ptr::eq(*matte, m) => {
                    members.push(sprite)
                }
                (Some(m), _) => out.push(Segment::Matted {
                    matte: m,
                    members: vec![sprite],
                }),
            }
        }
        out
    }

    fn draw_list(
        &self,
        ctx: &mut vello_cpu::RenderContext,
        list: &[&SpriteTimeline],
    ) -> SvgaResult<()> {
        for sprite in list {
            if let Some(pose) = sprite.pose(self.frame) {
                self.draw_sprite(ctx, sprite, pose)?;
            }
        }
        Ok(())
    }

    /// Mattes are evaluated even at zero alpha; an invisible matte hides its members.
    fn draw_matte(
        &self,
        ctx: &mut vello_cpu::RenderContext,
        matte: &SpriteTimeline,
    ) -> SvgaResult<()> {
        match matte.pose(self.frame) {
            Some(pose) if pose.alpha > 0.0 => self.draw_sprite(ctx, matte, pose),
            _ => Ok(()),
        }
    }

    fn bitmap_for(&self, sprite: &SpriteTimeline) -> Option<Bitmap> {
        let key = sprite.bitmap_key();
        if let Some(d) = self.dynamic
            && let Some(b) = d.image(key).or_else(|| d.image(&sprite.image_key))
        {
            return Some(b.clone());
        }
        self.entity.bitmap(key)
    }

    fn draw_sprite(
        &self,
        ctx: &mut vello_cpu::RenderContext,
        sprite: &SpriteTimeline,
        pose: &FramePose,
    ) -> SvgaResult<()> {
        let transform = self.base * pose.transform;
        let opacity = pose.alpha.clamp(0.0, 1.0) as f32;

        let clipped = if let Some(clip) = &pose.clip_path {
            ctx.set_transform(affine_to_cpu(transform));
            ctx.push_clip_layer(&bezpath_to_cpu(clip));
            true
        } else {
            false
        };
        let layered = opacity < 1.0;
        if layered {
            ctx.push_opacity_layer(opacity);
        }

        if let Some(bitmap) = self.bitmap_for(sprite) {
            draw_bitmap(ctx, &bitmap, transform, pose.layout)?;
        }
        for shape in pose.shapes.iter() {
            draw_shape(ctx, shape, transform);
        }

        if layered {
            ctx.pop_layer();
        }
        if clipped {
            ctx.pop_layer();
        }
        Ok(())
    }
}

/// Stretch the bitmap over the layout's size; the layout origin is not applied.
fn draw_bitmap(
    ctx: &mut vello_cpu::RenderContext,
    bitmap: &Bitmap,
    transform: Affine,
    layout: Rect,
) -> SvgaResult<()> {
    let (iw, ih) = (f64::from(bitmap.width), f64::from(bitmap.height));
    if layout.width() <= 0.0 || layout.height() <= 0.0 || iw <= 0.0 || ih <= 0.0 {
        return Ok(());
    }
    let t = transform * Affine::scale_non_uniform(layout.width() / iw, layout.height() / ih);

    ctx.set_transform(affine_to_cpu(t));
    ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
    ctx.set_paint(image_paint(bitmap)?);
    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, iw, ih));
    Ok(())
}

fn draw_shape(ctx: &mut vello_cpu::RenderContext, shape: &Shape, transform: Affine) {
    let style = &shape.style;
    let fill = style.fill.filter(|c| c.is_visible());
    let stroke = style
        .stroke
        .filter(|c| c.is_visible() && style.stroke_width > 0.0);
    if fill.is_none() && stroke.is_none() {
        return;
    }

    let path = bezpath_to_cpu(&shape.geometry.to_path());
    ctx.set_transform(affine_to_cpu(transform * shape.transform));

    if let Some(c) = fill {
        ctx.set_paint(color_to_cpu(c));
        ctx.fill_path(&path);
    }
    if let Some(c) = stroke {
        ctx.set_stroke(stroke_for(style));
        ctx.set_paint(color_to_cpu(c));
        ctx.stroke_path(&path);
    }
}

fn stroke_for(style: &ShapeStyle) -> vello_cpu::kurbo::Stroke {
    use vello_cpu::kurbo::{Cap, Join, Stroke};

    let mut s = Stroke::new(style.stroke_width)
        .with_caps(match style.line_cap {
            LineCap::Butt => Cap::Butt,
            LineCap::Round => Cap::Round,
            LineCap::Square => Cap::Square,
        })
        .with_join(match style.line_join {
            LineJoin::Miter => Join::Miter,
            LineJoin::Round => Join::Round,
            LineJoin::Bevel => Join::Bevel,
        })
        .with_miter_limit(style.miter_limit);
    if let Some(d) = style.dash {
        s = s.with_dashes(d.offset, [d.dash, d.gap]);
    }
    s
}

fn image_paint(bitmap: &Bitmap) -> SvgaResult<vello_cpu::Image> {
    if let Some(p) = bitmap.paint.get() {
        return Ok(p.clone());
    }
    let pixmap = pixmap_from_premul_bytes(&bitmap.rgba8_premul, bitmap.width, bitmap.height)?;
    let paint = vello_cpu::Image {
        image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
        sampler: vello_cpu::peniko::ImageSampler::default(),
    };
    Ok(bitmap.paint.get_or_init(|| paint).clone())
}

fn take_scratch(slot: &mut Option<vello_cpu::Pixmap>, w: u16, h: u16) -> vello_cpu::Pixmap {
    let mut p = match slot.take() {
        Some(p) if p.width() == w && p.height() == h => p,
        _ => vello_cpu::Pixmap::new(w, h),
    };
    clear_pixmap_to_transparent(&mut p);
    p
}

pub(crate) fn clear_pixmap_to_transparent(pixmap: &mut vello_cpu::Pixmap) {
    pixmap.data_as_u8_slice_mut().fill(0);
}

fn color_to_cpu(c: Rgba8) -> vello_cpu::peniko::Color {
    vello_cpu::peniko::Color::from_rgba8(c.r, c.g, c.b, c.a)
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(vello_cpu::kurbo::Point::new(p.x, p.y)),
            PathEl::LineTo(p) => out.line_to(vello_cpu::kurbo::Point::new(p.x, p.y)),
            PathEl::QuadTo(p1, p2) => out.quad_to(
                vello_cpu::kurbo::Point::new(p1.x, p1.y),
                vello_cpu::kurbo::Point::new(p2.x, p2.y),
            ),
            PathEl::CurveTo(p1, p2, p3) => out.curve_to(
                vello_cpu::kurbo::Point::new(p1.x, p1.y),
                vello_cpu::kurbo::Point::new(p2.x, p2.y),
                vello_cpu::kurbo::Point::new(p3.x, p3.y),
            ),
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

fn pixmap_from_premul_bytes(
    bytes: &[u8],
    width: u32,
    height: u32,
) -> SvgaResult<vello_cpu::Pixmap> {
    let size = PixelSize::new(width, height)?;
    let (w, h) = size.to_u16()?;
    if bytes.len() != size.rgba8_len() {
        return Err(SvgaError::validation("pixmap byte len mismatch"));
    }
    // Pixmap stores PremulRgba8; bitmap bytes are already premultiplied.
    let pixels: Vec<vello_cpu::peniko::color::PremulRgba8> = bytes
        .chunks_exact(4)
        .map(|px| vello_cpu::peniko::color::PremulRgba8::from_u8_array([px[0], px[1], px[2], px[3]]))
        .collect();
    Ok(vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, true))
}

#[inline]
fn mul_div255(a: u16, b: u16) -> u16 {
    (a * b + 127) / 255
}

/// Scale every premultiplied pixel of `layer` by the matching mask alpha.
fn mask_in_place(layer: &mut [u8], mask: &[u8]) {
    debug_assert_eq!(layer.len(), mask.len());
    for (d, m) in layer.chunks_exact_mut(4).zip(mask.chunks_exact(4)) {
        let w = u16::from(m[3]);
        for c in d.iter_mut() {
            *c = mul_div255(u16::from(*c), w) as u8;
        }
    }
}

/// Premultiplied source-over of `src` onto `dst`.
fn over_in_place(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        if s[3] == 0 {
            continue;
        }
        let inv = 255 - u16::from(s[3]);
        for i in 0..4 {
            d[i] = (u16::from(s[i]) + mul_div255(u16::from(d[i]), inv)).min(255) as u8;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/cpu.rs"]
mod tests;
