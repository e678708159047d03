use super::{DrawCommand, DrawList, LocatorContext, RenderPass};
use crate::geom::{Plane, Point3, Transform};
use crate::pool::{CuttingPlaneHandle, CuttingPlanePool};

/// Positions one cutting plane with the tool while the button is held.
#[derive(Debug)]
pub struct PlaneLocator {
    handle: Option<CuttingPlaneHandle>,
    active: bool,
    center: Option<Point3>,
}

impl PlaneLocator {
    /// Grabs the first free cutting plane. With the pool exhausted the
    /// locator holds nothing and ignores all input.
    pub fn new(pool: &mut CuttingPlanePool) -> Self {
        let handle = pool.allocate();
        if handle.is_none() {
            log::warn!("all {} cutting planes are in use", pool.capacity());
        }
        Self {
            handle,
            active: false,
            center: None,
        }
    }

    #[must_use]
    pub const fn has_slot(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn slot_index(&self) -> Option<usize> {
        self.handle.as_ref().map(|h| h.index())
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn on_press(&mut self, ctx: &mut LocatorContext<'_>) {
        let Some(handle) = &self.handle else {
            return;
        };
        match ctx.cutting_planes.set_active(handle, true) {
            Ok(()) => self.active = true,
            Err(err) => log::warn!("cutting plane: {err}"),
        }
    }

    pub(crate) fn on_motion(&mut self, device: &Transform, ctx: &mut LocatorContext<'_>) {
        if !self.active {
            return;
        }
        let (Some(handle), Some(plane)) = (&self.handle, Plane::from_device(device)) else {
            return;
        };
        match ctx.cutting_planes.get_mut(handle) {
            Ok(slot) => {
                slot.plane = plane;
                self.center = Some(device.origin());
            }
            Err(err) => log::warn!("cutting plane: {err}"),
        }
    }

    pub(crate) fn on_release(&mut self, ctx: &mut LocatorContext<'_>) {
        if let Some(handle) = &self.handle {
            if let Err(err) = ctx.cutting_planes.set_active(handle, false) {
                log::warn!("cutting plane: {err}");
            }
        }
        self.active = false;
    }

    pub(crate) fn render(&self, pool: &CuttingPlanePool, list: &mut DrawList) {
        let (Some(handle), Some(center)) = (&self.handle, self.center) else {
            return;
        };
        if let Ok(slot) = pool.get(handle) {
            list.push(
                RenderPass::Opaque,
                DrawCommand::CuttingPlane {
                    plane: slot.plane,
                    center,
                },
            );
        }
    }

    pub(crate) fn teardown(self, ctx: &mut LocatorContext<'_>) {
        if let Some(handle) = self.handle {
            if let Err(err) = ctx.cutting_planes.release(handle) {
                log::warn!("cutting plane: {err}");
            }
        }
    }
}
