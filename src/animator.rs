use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Visual effects applied to the closed chat toggle, one picked uniformly
/// at random per firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleEffect {
    Bounce,
    Pulse,
    Wiggle,
    Glow,
}

pub const EFFECTS: [ToggleEffect; 4] = [
    ToggleEffect::Bounce,
    ToggleEffect::Pulse,
    ToggleEffect::Wiggle,
    ToggleEffect::Glow,
];

/// Attention-drawing nudges shown in a transient speech bubble.
pub const BUBBLE_MESSAGES: [&str; 5] = [
    "Questions about the course?",
    "Stuck on Stata? Ask me!",
    "Need help merging data?",
    "Ask me about DiD, IV, or RDD",
    "Not sure where to start? Say hi",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    EffectStarted(ToggleEffect),
    EffectEnded,
    BubbleShown(&'static str),
    BubbleHidden,
}

/// Delay windows and display durations for the idle loops.
#[derive(Debug, Clone, Copy)]
pub struct PresenceTiming {
    pub effect_delay_min: Duration,
    pub effect_delay_max: Duration,
    pub effect_duration: Duration,
    pub bubble_delay_min: Duration,
    pub bubble_delay_max: Duration,
    pub bubble_duration: Duration,
}

impl Default for PresenceTiming {
    fn default() -> Self {
        Self {
            effect_delay_min: Duration::from_secs(15),
            effect_delay_max: Duration::from_secs(40),
            effect_duration: Duration::from_secs(2),
            bubble_delay_min: Duration::from_secs(25),
            bubble_delay_max: Duration::from_secs(60),
            bubble_duration: Duration::from_secs(5),
        }
    }
}

/// Idle-time animation loop for the closed chat toggle.
///
/// Two states: panel open (no timers) and panel closed (one effect timer
/// and one bubble timer outstanding, each rescheduling itself after it
/// fires). `open` aborts both tasks synchronously and emits clears, so
/// nothing stays visible or fires afterwards.
pub struct PresenceAnimator {
    tx: UnboundedSender<PresenceEvent>,
    timing: PresenceTiming,
    effect_task: Option<JoinHandle<()>>,
    bubble_task: Option<JoinHandle<()>>,
    panel_open: bool,
}

impl PresenceAnimator {
    /// Starts in the open (quiet) state; call [`close`](Self::close) to
    /// arm the loops once the chat panel is actually closed.
    pub fn new(timing: PresenceTiming, tx: UnboundedSender<PresenceEvent>) -> Self {
        Self {
            tx,
            timing,
            effect_task: None,
            bubble_task: None,
            panel_open: true,
        }
    }

    pub fn is_panel_open(&self) -> bool {
        self.panel_open
    }

    pub fn has_pending_timers(&self) -> bool {
        self.effect_task.is_some() || self.bubble_task.is_some()
    }

    /// Panel opened: cancel both timer loops and clear any display still
    /// on screen. Idempotent.
    pub fn open(&mut self) {
        if self.panel_open {
            return;
        }
        self.panel_open = true;
        if let Some(task) = self.effect_task.take() {
            task.abort();
        }
        if let Some(task) = self.bubble_task.take() {
            task.abort();
        }
        // In-flight displays are removed immediately, not left to expire.
        let _ = self.tx.send(PresenceEvent::EffectEnded);
        let _ = self.tx.send(PresenceEvent::BubbleHidden);
    }

    /// Panel closed: arm both self-rescheduling loops. Idempotent.
    pub fn close(&mut self) {
        if !self.panel_open {
            return;
        }
        self.panel_open = false;
        self.effect_task = Some(Self::spawn_effect_loop(self.tx.clone(), self.timing));
        self.bubble_task = Some(Self::spawn_bubble_loop(self.tx.clone(), self.timing));
    }

    fn spawn_effect_loop(tx: UnboundedSender<PresenceEvent>, t: PresenceTiming) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(random_delay(t.effect_delay_min, t.effect_delay_max)).await;
                let effect = EFFECTS[rand::thread_rng().gen_range(0..EFFECTS.len())];
                if tx.send(PresenceEvent::EffectStarted(effect)).is_err() {
                    break;
                }
                tokio::time::sleep(t.effect_duration).await;
                if tx.send(PresenceEvent::EffectEnded).is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_bubble_loop(tx: UnboundedSender<PresenceEvent>, t: PresenceTiming) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(random_delay(t.bubble_delay_min, t.bubble_delay_max)).await;
                let message = BUBBLE_MESSAGES[rand::thread_rng().gen_range(0..BUBBLE_MESSAGES.len())];
                if tx.send(PresenceEvent::BubbleShown(message)).is_err() {
                    break;
                }
                tokio::time::sleep(t.bubble_duration).await;
                if tx.send(PresenceEvent::BubbleHidden).is_err() {
                    break;
                }
            }
        })
    }
}

impl Drop for PresenceAnimator {
    fn drop(&mut self) {
        if let Some(task) = self.effect_task.take() {
            task.abort();
        }
        if let Some(task) = self.bubble_task.take() {
            task.abort();
        }
    }
}

fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn fast_timing() -> PresenceTiming {
        PresenceTiming {
            effect_delay_min: Duration::from_millis(100),
            effect_delay_max: Duration::from_millis(300),
            effect_duration: Duration::from_millis(50),
            bubble_delay_min: Duration::from_millis(200),
            bubble_delay_max: Duration::from_millis(500),
            bubble_duration: Duration::from_millis(80),
        }
    }

    fn animator() -> (PresenceAnimator, UnboundedReceiver<PresenceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PresenceAnimator::new(fast_timing(), tx), rx)
    }

    async fn next_within(
        rx: &mut UnboundedReceiver<PresenceEvent>,
        window: Duration,
    ) -> Option<PresenceEvent> {
        tokio::time::timeout(window, rx.recv()).await.ok().flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn closed_panel_fires_within_window_bounds() {
        let (mut animator, mut rx) = animator();
        animator.close();

        // First firing of either loop lands no later than the widest
        // window's upper bound.
        let event = next_within(&mut rx, Duration::from_millis(600)).await;
        assert!(matches!(
            event,
            Some(PresenceEvent::EffectStarted(_)) | Some(PresenceEvent::BubbleShown(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn effect_reverts_after_its_duration() {
        let (mut animator, mut rx) = animator();
        animator.close();

        let mut saw_start = false;
        for _ in 0..4 {
            match next_within(&mut rx, Duration::from_secs(2)).await {
                Some(PresenceEvent::EffectStarted(_)) => saw_start = true,
                Some(PresenceEvent::EffectEnded) => {
                    assert!(saw_start, "revert before any effect started");
                    return;
                }
                _ => {}
            }
        }
        panic!("effect never reverted");
    }

    #[tokio::test(start_paused = true)]
    async fn loop_is_self_perpetuating_while_closed() {
        let (mut animator, mut rx) = animator();
        animator.close();

        let mut effect_firings = 0;
        while effect_firings < 3 {
            match next_within(&mut rx, Duration::from_secs(5)).await {
                Some(PresenceEvent::EffectStarted(_)) => effect_firings += 1,
                Some(_) => {}
                None => panic!("loop stopped rescheduling"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_cancels_timers_and_silences_the_loop() {
        let (mut animator, mut rx) = animator();
        animator.close();
        assert!(animator.has_pending_timers());

        animator.open();
        assert!(!animator.has_pending_timers());

        // open() clears any display first.
        assert_eq!(rx.recv().await, Some(PresenceEvent::EffectEnded));
        assert_eq!(rx.recv().await, Some(PresenceEvent::BubbleHidden));

        // Wait far past every configured window: nothing may fire.
        let event = next_within(&mut rx, Duration::from_secs(60)).await;
        assert_eq!(event, None);
    }

    #[tokio::test(start_paused = true)]
    async fn close_after_open_resumes_the_loop() {
        let (mut animator, mut rx) = animator();
        animator.close();
        animator.open();
        while let Ok(event) = rx.try_recv() {
            // Drain the clears from open().
            assert!(matches!(
                event,
                PresenceEvent::EffectEnded | PresenceEvent::BubbleHidden
            ));
        }

        animator.close();
        let event = next_within(&mut rx, Duration::from_millis(600)).await;
        assert!(matches!(
            event,
            Some(PresenceEvent::EffectStarted(_)) | Some(PresenceEvent::BubbleShown(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn open_and_close_are_idempotent() {
        let (mut animator, _rx) = animator();
        animator.close();
        animator.close();
        assert!(animator.has_pending_timers());
        animator.open();
        animator.open();
        assert!(!animator.has_pending_timers());
        assert!(animator.is_panel_open());
    }
}
