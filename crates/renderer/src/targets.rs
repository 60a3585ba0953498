use crate::context::{ColorFormat, DrawBinding, DrawTargetId, GraphicsContext, TextureId};
use crate::error::{RenderError, Result};

/// Selects one texture of a [`FeedbackTargetPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Writing,
}

/// Textures handed out by [`FeedbackTargetPair::begin_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTargets {
    /// Destination of the current step's draw.
    pub back: TextureId,
    /// Previous step's output, sampled by the current draw.
    pub front: TextureId,
}

/// Two equally sized color textures and the draw target that renders into
/// whichever one is currently the back buffer.
///
/// The pair moves through `Idle → Writing → Idle` once per simulation step.
/// The front selector only changes in [`end_write_and_swap`], so front and
/// back can never name the same texture.
///
/// [`end_write_and_swap`]: FeedbackTargetPair::end_write_and_swap
#[derive(Debug)]
pub struct FeedbackTargetPair {
    textures: [TextureId; 2],
    draw_target: DrawTargetId,
    front: Slot,
    phase: Phase,
    format: ColorFormat,
    width: u32,
    height: u32,
}

impl FeedbackTargetPair {
    /// Allocates both textures at `width`×`height` in the best renderable
    /// format, with the first texture as front.
    pub fn new<C: GraphicsContext>(
        ctx: &mut C,
        width: u32,
        height: u32,
        prefer_high_precision: bool,
    ) -> Result<Self> {
        let capabilities = ctx.capabilities();
        let format = ColorFormat::negotiate(capabilities, prefer_high_precision)
            .ok_or(RenderError::UnsupportedFormat)?;
        let (width, height) = (width.max(1), height.max(1));
        tracing::info!(%format, width, height, ?capabilities, "allocating feedback textures");

        let textures = allocate(ctx, width, height, format)?;
        let draw_target = ctx.create_draw_target()?;
        Ok(Self {
            textures,
            draw_target,
            front: Slot::First,
            phase: Phase::Idle,
            format,
            width,
            height,
        })
    }

    /// Replaces both textures with fresh, cleared ones of the new size.
    ///
    /// The format is kept and the first texture becomes front again. Only
    /// valid between steps.
    pub fn resize<C: GraphicsContext>(&mut self, ctx: &mut C, width: u32, height: u32) -> Result<()> {
        if self.phase == Phase::Writing {
            return Err(RenderError::Sequence("resize requested while a write is in progress"));
        }
        let (width, height) = (width.max(1), height.max(1));
        tracing::debug!(
            from_width = self.width,
            from_height = self.height,
            width,
            height,
            "reallocating feedback textures"
        );

        let textures = allocate(ctx, width, height, self.format)?;
        for texture in std::mem::replace(&mut self.textures, textures) {
            ctx.destroy_texture(texture);
        }
        self.front = Slot::First;
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Routes draws into the back texture and returns both textures of the step.
    pub fn begin_write<C: GraphicsContext>(&mut self, ctx: &mut C) -> Result<WriteTargets> {
        if self.phase == Phase::Writing {
            return Err(RenderError::Sequence("begin_write called twice in one step"));
        }
        let targets = WriteTargets {
            back: self.back(),
            front: self.front(),
        };
        ctx.bind_draw_target(DrawBinding::Offscreen {
            target: self.draw_target,
            texture: targets.back,
        })?;
        self.phase = Phase::Writing;
        Ok(targets)
    }

    /// Restores the visible surface as draw destination and promotes the
    /// freshly written back texture to front.
    pub fn end_write_and_swap<C: GraphicsContext>(&mut self, ctx: &mut C) -> Result<()> {
        if self.phase != Phase::Writing {
            return Err(RenderError::Sequence("end_write_and_swap called without begin_write"));
        }
        ctx.bind_draw_target(DrawBinding::Surface)?;
        self.front = self.front.other();
        self.phase = Phase::Idle;
        Ok(())
    }

    pub fn front(&self) -> TextureId {
        self.textures[self.front.index()]
    }

    pub fn back(&self) -> TextureId {
        self.textures[self.front.other().index()]
    }

    pub fn front_slot(&self) -> Slot {
        self.front
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn is_writing(&self) -> bool {
        self.phase == Phase::Writing
    }

    /// Replaces the front texture's contents, e.g. to give a simulation an
    /// initial state other than transparent black.
    pub fn seed<C: GraphicsContext>(&self, ctx: &mut C, texels: &[[f32; 4]]) -> Result<()> {
        ctx.upload_texture(self.front(), texels)
    }

    /// Releases both textures.
    pub fn release<C: GraphicsContext>(self, ctx: &mut C) {
        for texture in self.textures {
            ctx.destroy_texture(texture);
        }
    }
}

fn allocate<C: GraphicsContext>(
    ctx: &mut C,
    width: u32,
    height: u32,
    format: ColorFormat,
) -> Result<[TextureId; 2]> {
    let first = ctx.create_texture(width, height, format)?;
    match ctx.create_texture(width, height, format) {
        Ok(second) => Ok([first, second]),
        Err(err) => {
            ctx.destroy_texture(first);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Capabilities;
    use crate::software::SoftwareContext;

    #[test]
    fn slots_alternate() {
        assert_eq!(Slot::First.other(), Slot::Second);
        assert_eq!(Slot::Second.other(), Slot::First);
        assert_eq!(Slot::First.other().other(), Slot::First);
    }

    #[test]
    fn front_and_back_trade_places_on_swap() {
        let mut ctx = SoftwareContext::new(4, 4);
        let mut pair = FeedbackTargetPair::new(&mut ctx, 4, 4, true).expect("pair");
        let (front, back) = (pair.front(), pair.back());
        assert_ne!(front, back);

        let targets = pair.begin_write(&mut ctx).expect("begin");
        assert_eq!(targets, WriteTargets { back, front });
        assert!(pair.is_writing());
        pair.end_write_and_swap(&mut ctx).expect("swap");

        assert_eq!(pair.front(), back);
        assert_eq!(pair.back(), front);
        assert_eq!(pair.front_slot(), Slot::Second);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let mut ctx = SoftwareContext::new(2, 2);
        let mut pair = FeedbackTargetPair::new(&mut ctx, 2, 2, false).expect("pair");
        assert!(matches!(
            pair.end_write_and_swap(&mut ctx),
            Err(RenderError::Sequence(_))
        ));
        pair.begin_write(&mut ctx).expect("begin");
        assert!(matches!(pair.begin_write(&mut ctx), Err(RenderError::Sequence(_))));
        assert!(matches!(pair.resize(&mut ctx, 3, 3), Err(RenderError::Sequence(_))));
    }

    #[test]
    fn construction_fails_without_renderable_formats() {
        let mut ctx = SoftwareContext::with_capabilities(
            2,
            2,
            Capabilities {
                float_color: false,
                unorm_color: false,
            },
        );
        assert!(matches!(
            FeedbackTargetPair::new(&mut ctx, 2, 2, true),
            Err(RenderError::UnsupportedFormat)
        ));
    }

    #[test]
    fn resize_keeps_format_and_frees_old_textures() {
        let mut ctx = SoftwareContext::new(4, 4);
        let mut pair = FeedbackTargetPair::new(&mut ctx, 4, 4, true).expect("pair");
        pair.begin_write(&mut ctx).expect("begin");
        pair.end_write_and_swap(&mut ctx).expect("swap");
        let old = [pair.front(), pair.back()];

        pair.resize(&mut ctx, 8, 6).expect("resize");
        assert_eq!(pair.size(), (8, 6));
        assert_eq!(pair.format(), ColorFormat::Float);
        assert_eq!(pair.front_slot(), Slot::First);
        assert!(old.iter().all(|texture| !ctx.is_live(*texture)));
        assert_eq!(ctx.live_textures(), 2);
        assert_eq!(ctx.texture_size(pair.front()), Some((8, 6)));
        assert_eq!(ctx.texture_format(pair.back()), Some(ColorFormat::Float));
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let mut ctx = SoftwareContext::new(1, 1);
        let pair = FeedbackTargetPair::new(&mut ctx, 0, 0, false).expect("pair");
        assert_eq!(pair.size(), (1, 1));
        assert_eq!(pair.format(), ColorFormat::Unorm8);
    }
}
