/// Turns a polled pressed/released level into press edges.
///
/// Fires once on the frame the input goes down; holding it fires nothing
/// further until it is released. No debouncing is done here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeDetector {
    down: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, raw_pressed: bool) -> bool {
        if !raw_pressed {
            self.down = false;
            return false;
        }
        if self.down {
            return false;
        }
        self.down = true;
        true
    }

    pub fn is_down(&self) -> bool {
        self.down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_input_fires_once() {
        let mut edge = EdgeDetector::new();
        let fired: Vec<bool> = [false, true, true, true, false, true, false]
            .into_iter()
            .map(|raw| edge.poll(raw))
            .collect();
        assert_eq!(fired, vec![false, true, false, false, false, true, false]);
    }

    #[test]
    fn release_rearms() {
        let mut edge = EdgeDetector::new();
        assert!(edge.poll(true));
        assert!(edge.is_down());
        assert!(!edge.poll(false));
        assert!(!edge.is_down());
        assert!(edge.poll(true));
    }
}
