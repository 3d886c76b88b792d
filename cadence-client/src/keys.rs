//! Global keyboard shortcuts, including `g`-prefixed navigation chords.

use cadence_core::{Product, View};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::time::{Duration, Instant};

pub const CHORD_PREFIX: char = 'g';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    GoTo(View),
    OpenHelp,
    OpenSearch,
    OpenCommandPalette,
}

/// Second key of a `g` chord for each product.
pub fn chord_target(product: Product, key: char) -> Option<View> {
    let view = match (product, key) {
        (_, 'd') => View::Dashboard,
        (_, 'm') => View::Messages,
        (_, 's') => View::Settings,
        (Product::Practice, 'c') => View::Clients,
        (Product::Practice, 'i') => View::Invoices,
        (Product::Practice, 'f') => View::Documents,
        (Product::Practice, 't') => View::Tasks,
        (Product::Talent, 'c') => View::Candidates,
        (Product::Talent, 'j') => View::Jobs,
        (Product::Talent, 'i') => View::Interviews,
        (Product::Talent, 'p') => View::Pipeline,
        _ => return None,
    };
    Some(view)
}

/// Turns key presses into [`Shortcut`]s.
///
/// A chord fires only when its second key arrives within `timeout` of the
/// prefix. Time is passed in so callers and tests control the clock.
#[derive(Debug, Clone)]
pub struct ChordDetector {
    product: Product,
    timeout: Duration,
    pending_since: Option<Instant>,
}

impl ChordDetector {
    pub fn new(product: Product, timeout: Duration) -> Self {
        Self {
            product,
            timeout,
            pending_since: None,
        }
    }

    pub fn handle(&mut self, event: KeyEvent, now: Instant) -> Option<Shortcut> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        let pending = self
            .pending_since
            .take()
            .is_some_and(|since| now.saturating_duration_since(since) <= self.timeout);

        if event.modifiers.contains(KeyModifiers::CONTROL) {
            return match event.code {
                KeyCode::Char('k') | KeyCode::Char('K') => Some(Shortcut::OpenCommandPalette),
                _ => None,
            };
        }
        if event.modifiers.intersects(KeyModifiers::ALT | KeyModifiers::SUPER) {
            return None;
        }

        let KeyCode::Char(key) = event.code else {
            return None;
        };
        if pending {
            if let Some(view) = chord_target(self.product, key) {
                return Some(Shortcut::GoTo(view));
            }
        }
        match key {
            CHORD_PREFIX => {
                self.pending_since = Some(now);
                None
            }
            '?' => Some(Shortcut::OpenHelp),
            '/' => Some(Shortcut::OpenSearch),
            _ => None,
        }
    }

    /// Whether a prefix is waiting for its second key at `now`.
    pub fn is_pending(&self, now: Instant) -> bool {
        self.pending_since
            .is_some_and(|since| now.saturating_duration_since(since) <= self.timeout)
    }

    pub fn reset(&mut self) {
        self.pending_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    fn detector(product: Product) -> ChordDetector {
        ChordDetector::new(product, Duration::from_millis(500))
    }

    #[test]
    fn chord_within_window_navigates() {
        let mut keys = detector(Product::Practice);
        let t0 = Instant::now();
        assert_eq!(keys.handle(press('g'), t0), None);
        assert!(keys.is_pending(t0 + Duration::from_millis(100)));
        assert_eq!(
            keys.handle(press('d'), t0 + Duration::from_millis(200)),
            Some(Shortcut::GoTo(View::Dashboard))
        );
        assert!(!keys.is_pending(t0 + Duration::from_millis(200)));
    }

    #[test]
    fn chord_after_window_does_not_fire() {
        let mut keys = detector(Product::Practice);
        let t0 = Instant::now();
        keys.handle(press('g'), t0);
        assert_eq!(keys.handle(press('d'), t0 + Duration::from_millis(501)), None);
    }

    #[test]
    fn targets_depend_on_product() {
        let t0 = Instant::now();
        let mut practice = detector(Product::Practice);
        practice.handle(press('g'), t0);
        assert_eq!(
            practice.handle(press('c'), t0),
            Some(Shortcut::GoTo(View::Clients))
        );

        let mut talent = detector(Product::Talent);
        talent.handle(press('g'), t0);
        assert_eq!(
            talent.handle(press('c'), t0),
            Some(Shortcut::GoTo(View::Candidates))
        );
        assert_eq!(chord_target(Product::Practice, 'j'), None);
    }

    #[test]
    fn single_key_shortcuts() {
        let mut keys = detector(Product::Talent);
        let now = Instant::now();
        assert_eq!(keys.handle(press('?'), now), Some(Shortcut::OpenHelp));
        assert_eq!(keys.handle(press('/'), now), Some(Shortcut::OpenSearch));
        assert_eq!(
            keys.handle(
                KeyEvent::new(KeyCode::Char('k'), KeyModifiers::CONTROL),
                now
            ),
            Some(Shortcut::OpenCommandPalette)
        );
        assert_eq!(keys.handle(press('d'), now), None);
    }

    #[test]
    fn unmapped_second_key_cancels_chord() {
        let mut keys = detector(Product::Practice);
        let t0 = Instant::now();
        keys.handle(press('g'), t0);
        assert_eq!(keys.handle(press('x'), t0), None);
        assert_eq!(keys.handle(press('d'), t0), None);
    }
}
