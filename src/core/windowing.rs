//! Fixed-size, fixed-stride windows over a session's samples.
//!
//! Windows start at multiples of the step and never run past the end of the
//! session; the trailing partial window is dropped.

use crate::core::session::{Sample, Session};

/// Window length and stride, both in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub window_size: usize,
    pub step_size: usize,
}

impl WindowSpec {
    pub fn new(window_size: usize, step_size: usize) -> Self {
        Self {
            window_size,
            step_size,
        }
    }

    /// Number of complete windows in a session of `n` samples.
    pub fn window_count(&self, n: usize) -> usize {
        if self.window_size == 0 || self.step_size == 0 || n < self.window_size {
            0
        } else {
            (n - self.window_size) / self.step_size + 1
        }
    }

    /// Iterate the windows of a session.
    pub fn windows<'a>(&self, session: &'a Session) -> Windows<'a> {
        Windows {
            session,
            spec: *self,
            next_start: 0,
        }
    }
}

/// A read-only view of `window_size` contiguous samples.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    /// Index of the first sample within the session
    pub start: usize,
    /// The samples covered by this window
    pub samples: &'a [Sample],
}

impl<'a> Window<'a> {
    /// Values of one channel across the window.
    pub fn channel_values(&self, channel_idx: usize) -> impl Iterator<Item = f64> + 'a {
        self.samples.iter().map(move |s| s.values[channel_idx])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Lazy iterator over the windows of one session.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    session: &'a Session,
    spec: WindowSpec,
    next_start: usize,
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let WindowSpec {
            window_size,
            step_size,
        } = self.spec;
        if window_size == 0 || step_size == 0 {
            return None;
        }

        let start = self.next_start;
        let stop = start.checked_add(window_size)?;
        if stop > self.session.samples.len() {
            return None;
        }

        self.next_start = start.saturating_add(step_size);
        Some(Window {
            start,
            samples: &self.session.samples[start..stop],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .session
            .samples
            .len()
            .saturating_sub(self.next_start);
        let count = self.spec.window_count(remaining);
        (count, Some(count))
    }
}

impl ExactSizeIterator for Windows<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_of(n: usize) -> Session {
        Session {
            session_id: 0,
            label: 1,
            source_name: "good_test.csv".into(),
            channels: vec!["a".into()],
            samples: (0..n)
                .map(|i| Sample {
                    t_ms: i as u64 * 20,
                    values: vec![i as f64],
                })
                .collect(),
        }
    }

    #[test]
    fn test_window_count_formula() {
        let spec = WindowSpec::new(4, 2);
        assert_eq!(spec.window_count(6), 2);
        assert_eq!(spec.window_count(4), 1);
        assert_eq!(spec.window_count(3), 0);
        assert_eq!(spec.window_count(0), 0);
        assert_eq!(spec.window_count(7), 2);

        let spec = WindowSpec::new(50, 25);
        assert_eq!(spec.window_count(6000), 239);
    }

    #[test]
    fn test_iterator_matches_count() {
        for n in 0..40 {
            for (w, s) in [(1, 1), (4, 2), (5, 3), (10, 10), (3, 7)] {
                let spec = WindowSpec::new(w, s);
                let session = session_of(n);
                let windows: Vec<Window> = spec.windows(&session).collect();
                assert_eq!(windows.len(), spec.window_count(n), "n={n} w={w} s={s}");
                for (k, window) in windows.iter().enumerate() {
                    assert_eq!(window.start, k * s);
                    assert_eq!(window.len(), w);
                }
            }
        }
    }

    #[test]
    fn test_tail_dropped() {
        let session = session_of(7);
        let spec = WindowSpec::new(4, 2);
        let starts: Vec<usize> = spec.windows(&session).map(|w| w.start).collect();
        assert_eq!(starts, vec![0, 2]);
    }

    #[test]
    fn test_restartable() {
        let session = session_of(10);
        let spec = WindowSpec::new(3, 2);
        let first: Vec<usize> = spec.windows(&session).map(|w| w.start).collect();
        let second: Vec<usize> = spec.windows(&session).map(|w| w.start).collect();
        assert_eq!(first, second);
        assert_eq!(spec.windows(&session).len(), 4);
    }

    #[test]
    fn test_channel_values() {
        let session = session_of(6);
        let window = WindowSpec::new(3, 3).windows(&session).nth(1).unwrap();
        let values: Vec<f64> = window.channel_values(0).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }
}
