// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing: per-slot sync objects and the acquire, render, present sequence.
use ash::vk;
use tracing::{debug, warn};

use crate::error::{RenderError, Result};
use crate::gpu::{AcquireOutcome, Gpu, PresentOutcome, Submission};

/// Frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    OffscreenSubmitted,
    CompositeSubmitted,
    Presenting,
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub frame_presentable: vk::Semaphore,
    /// Created signaled so the first wait on a fresh slot returns at once.
    pub in_flight: vk::Fence,
    pub state: SlotState,
}

/// Why the swapchain must be rebuilt before the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleReason {
    AcquireOutOfDate,
    PresentOutOfDate,
    PresentSuboptimal,
    Resized,
}

impl StaleReason {
    pub fn describe(self) -> &'static str {
        match self {
            StaleReason::AcquireOutOfDate => "acquire out of date",
            StaleReason::PresentOutOfDate => "present out of date",
            StaleReason::PresentSuboptimal => "present suboptimal",
            StaleReason::Resized => "window resized",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Stale(StaleReason),
}

/// Command buffers recorded against the current swapchain, indexed by image.
#[derive(Clone, Copy, Debug)]
pub struct FrameTargets<'a> {
    pub swapchain: vk::SwapchainKHR,
    pub offscreen: &'a [vk::CommandBuffer],
    pub composite: &'a [vk::CommandBuffer],
}

#[derive(Debug)]
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    current: usize,
    /// The offscreen target is shared by every slot, so its pass is serialized.
    offscreen_done: vk::Semaphore,
    offscreen_fence: vk::Fence,
    resize_requested: bool,
    frame_count: u64,
}

impl FrameScheduler {
    pub fn new<G: Gpu>(gpu: &mut G) -> Result<Self> {
        let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            slots.push(FrameSlot {
                image_available: gpu.create_semaphore()?,
                frame_presentable: gpu.create_semaphore()?,
                in_flight: gpu.create_fence(true)?,
                state: SlotState::Idle,
            });
        }
        Ok(FrameScheduler {
            slots,
            current: 0,
            offscreen_done: gpu.create_semaphore()?,
            offscreen_fence: gpu.create_fence(true)?,
            resize_requested: false,
            frame_count: 0,
        })
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Drops a pending resize request once the swapchain has been rebuilt anyway.
    pub fn acknowledge_resize(&mut self) {
        self.resize_requested = false;
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    /// Runs one frame on the current slot.
    ///
    /// `upload` runs after the image is acquired and before anything that reads
    /// the image's uniform buffer is submitted.
    pub fn draw_frame<G, F>(
        &mut self,
        gpu: &mut G,
        targets: FrameTargets<'_>,
        upload: F,
    ) -> Result<FrameOutcome>
    where
        G: Gpu,
        F: FnOnce(&mut G, usize) -> Result<()>,
    {
        let outcome = self.run_slot(gpu, targets, upload);
        // 7) The slot moves on whatever happened to this frame.
        self.slots[self.current].state = SlotState::Idle;
        self.current = (self.current + 1) % self.slots.len();
        let outcome = outcome?;
        self.frame_count += 1;

        let resized = std::mem::take(&mut self.resize_requested);
        if resized && outcome == FrameOutcome::Presented {
            return Ok(FrameOutcome::Stale(StaleReason::Resized));
        }
        Ok(outcome)
    }

    fn run_slot<G, F>(
        &mut self,
        gpu: &mut G,
        targets: FrameTargets<'_>,
        upload: F,
    ) -> Result<FrameOutcome>
    where
        G: Gpu,
        F: FnOnce(&mut G, usize) -> Result<()>,
    {
        let slot = self.slots[self.current];

        // 1) Wait until this slot's previous frame has left the GPU.
        gpu.wait_for_fence(slot.in_flight)?;

        // 2) Acquire
        self.slots[self.current].state = SlotState::Acquiring;
        let index = match gpu.acquire_next_image(targets.swapchain, slot.image_available)? {
            AcquireOutcome::Acquired { index, suboptimal } => {
                if suboptimal {
                    warn!("vk: acquired image {index} from a suboptimal swapchain");
                }
                index
            }
            AcquireOutcome::OutOfDate => {
                debug!("vk: swapchain out of date on acquire");
                return Ok(FrameOutcome::Stale(StaleReason::AcquireOutOfDate));
            }
        };
        let image = index as usize;
        if image >= targets.offscreen.len() || image >= targets.composite.len() {
            return Err(RenderError::ImageIndex {
                index,
                count: targets.composite.len(),
            });
        }

        // 3) Per-frame uniforms
        upload(gpu, image)?;

        // 4) Offscreen pass; serialized on its own fence.
        gpu.wait_for_fence(self.offscreen_fence)?;
        gpu.reset_fence(self.offscreen_fence)?;
        gpu.submit(&Submission {
            command_buffer: targets.offscreen[image],
            wait: Some((
                slot.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some(self.offscreen_done),
            fence: Some(self.offscreen_fence),
        })?;
        self.slots[self.current].state = SlotState::OffscreenSubmitted;

        // 5) Composite pass; its fence retires the slot.
        gpu.reset_fence(slot.in_flight)?;
        gpu.submit(&Submission {
            command_buffer: targets.composite[image],
            wait: Some((
                self.offscreen_done,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
            )),
            signal: Some(slot.frame_presentable),
            fence: Some(slot.in_flight),
        })?;
        self.slots[self.current].state = SlotState::CompositeSubmitted;

        // 6) Present
        self.slots[self.current].state = SlotState::Presenting;
        match gpu.present(targets.swapchain, index, slot.frame_presentable)? {
            PresentOutcome::Presented => Ok(FrameOutcome::Presented),
            PresentOutcome::Suboptimal => Ok(FrameOutcome::Stale(StaleReason::PresentSuboptimal)),
            PresentOutcome::OutOfDate => Ok(FrameOutcome::Stale(StaleReason::PresentOutOfDate)),
        }
    }

    /// Caller must have waited for the device to go idle.
    pub fn destroy<G: Gpu>(self, gpu: &mut G) {
        gpu.destroy_fence(self.offscreen_fence);
        gpu.destroy_semaphore(self.offscreen_done);
        for slot in self.slots {
            gpu.destroy_fence(slot.in_flight);
            gpu.destroy_semaphore(slot.frame_presentable);
            gpu.destroy_semaphore(slot.image_available);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::QueueKind;
    use crate::testing::{FenceState, Kind, TrackingGpu};

    struct Fixture {
        gpu: TrackingGpu,
        swapchain: vk::SwapchainKHR,
        offscreen: Vec<vk::CommandBuffer>,
        composite: Vec<vk::CommandBuffer>,
    }

    fn fixture() -> Fixture {
        use crate::gpu::{Sharing, SwapchainDesc};
        let mut gpu = TrackingGpu::new(640, 480);
        let swapchain = gpu
            .create_swapchain(&SwapchainDesc {
                surface_format: vk::SurfaceFormatKHR::default(),
                present_mode: vk::PresentModeKHR::FIFO,
                extent: vk::Extent2D {
                    width: 640,
                    height: 480,
                },
                min_image_count: 3,
                pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                sharing: Sharing::Exclusive,
            })
            .unwrap();
        let pool = gpu.create_command_pool(QueueKind::Graphics).unwrap();
        let offscreen = gpu.allocate_command_buffers(pool, 3).unwrap();
        let composite = gpu.allocate_command_buffers(pool, 3).unwrap();
        for &cb in offscreen.iter().chain(&composite) {
            gpu.record(cb, &[]).unwrap();
        }
        Fixture {
            gpu,
            swapchain,
            offscreen,
            composite,
        }
    }

    impl Fixture {
        fn frame(&mut self, scheduler: &mut FrameScheduler) -> Result<FrameOutcome> {
            let targets = FrameTargets {
                swapchain: self.swapchain,
                offscreen: &self.offscreen,
                composite: &self.composite,
            };
            scheduler.draw_frame(&mut self.gpu, targets, |_, _| Ok(()))
        }
    }

    #[test]
    fn slots_rotate_round_robin() {
        let mut f = fixture();
        let mut scheduler = FrameScheduler::new(&mut f.gpu).unwrap();
        assert_eq!(f.gpu.live(Kind::Fence), FRAMES_IN_FLIGHT + 1);
        for expected in [1, 0, 1, 0] {
            assert_eq!(f.frame(&mut scheduler).unwrap(), FrameOutcome::Presented);
            assert_eq!(scheduler.current_slot(), expected);
        }
        assert_eq!(scheduler.frame_count(), 4);
    }

    #[test]
    fn offscreen_then_composite_per_frame() {
        let mut f = fixture();
        let mut scheduler = FrameScheduler::new(&mut f.gpu).unwrap();
        f.frame(&mut scheduler).unwrap();

        let [off, comp] = [f.gpu.submissions[0], f.gpu.submissions[1]];
        let slot = scheduler.slots()[0];
        assert_eq!(off.command_buffer, f.offscreen[0]);
        assert_eq!(
            off.wait,
            Some((
                slot.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            ))
        );
        assert_eq!(comp.command_buffer, f.composite[0]);
        assert_eq!(comp.wait.map(|(s, _)| s), off.signal);
        assert!(comp
            .wait
            .unwrap()
            .1
            .contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert_eq!(comp.signal, Some(slot.frame_presentable));
        assert_eq!(comp.fence, Some(slot.in_flight));
        assert_eq!(f.gpu.fence_state(slot.in_flight), Some(FenceState::Pending));
    }

    #[test]
    fn out_of_date_acquire_still_advances() {
        let mut f = fixture();
        let mut scheduler = FrameScheduler::new(&mut f.gpu).unwrap();
        f.gpu.acquire_script.push_back(AcquireOutcome::OutOfDate);
        assert_eq!(
            f.frame(&mut scheduler).unwrap(),
            FrameOutcome::Stale(StaleReason::AcquireOutOfDate)
        );
        assert_eq!(scheduler.current_slot(), 1);
        assert!(f.gpu.submissions.is_empty());
        assert_eq!(f.frame(&mut scheduler).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn resize_flag_is_reported_once() {
        let mut f = fixture();
        let mut scheduler = FrameScheduler::new(&mut f.gpu).unwrap();
        scheduler.request_resize();
        scheduler.request_resize();
        assert_eq!(
            f.frame(&mut scheduler).unwrap(),
            FrameOutcome::Stale(StaleReason::Resized)
        );
        assert_eq!(f.frame(&mut scheduler).unwrap(), FrameOutcome::Presented);

        scheduler.request_resize();
        scheduler.acknowledge_resize();
        assert_eq!(f.frame(&mut scheduler).unwrap(), FrameOutcome::Presented);
    }

    #[test]
    fn present_results_map_to_stale_reasons() {
        let mut f = fixture();
        let mut scheduler = FrameScheduler::new(&mut f.gpu).unwrap();
        f.gpu.present_script.push_back(PresentOutcome::Suboptimal);
        f.gpu.present_script.push_back(PresentOutcome::OutOfDate);
        assert_eq!(
            f.frame(&mut scheduler).unwrap(),
            FrameOutcome::Stale(StaleReason::PresentSuboptimal)
        );
        assert_eq!(
            f.frame(&mut scheduler).unwrap(),
            FrameOutcome::Stale(StaleReason::PresentOutOfDate)
        );
    }

    #[test]
    fn foreign_image_index_is_an_error() {
        let mut f = fixture();
        let mut scheduler = FrameScheduler::new(&mut f.gpu).unwrap();
        f.gpu.acquire_script.push_back(AcquireOutcome::Acquired {
            index: 7,
            suboptimal: false,
        });
        let err = f.frame(&mut scheduler).unwrap_err();
        assert!(matches!(err, RenderError::ImageIndex { index: 7, count: 3 }));
        assert_eq!(scheduler.current_slot(), 1);
    }

    #[test]
    fn destroy_releases_sync_objects() {
        let mut f = fixture();
        let scheduler = FrameScheduler::new(&mut f.gpu).unwrap();
        scheduler.destroy(&mut f.gpu);
        assert_eq!(f.gpu.live(Kind::Fence), 0);
        assert_eq!(f.gpu.live(Kind::Semaphore), 0);
    }
}
