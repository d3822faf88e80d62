use crate::models::TimeRange;

/// Even split of a timeline across slides
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTiming {
    pub total_secs: f64,
    pub slides: usize,
}

impl SlideTiming {
    #[must_use]
    pub fn even(total_secs: f64, slides: usize) -> Self {
        Self {
            total_secs: total_secs.max(0.0),
            slides: slides.max(1),
        }
    }

    #[must_use]
    pub fn per_slide(&self) -> f64 {
        self.total_secs / self.slides as f64
    }

    /// `[i*d, (i+1)*d)` for slide `i`. The last slide ends exactly at the total.
    #[must_use]
    pub fn range(&self, index: usize) -> TimeRange {
        let d = self.per_slide();
        let start = d * index as f64;
        let end = if index + 1 >= self.slides {
            self.total_secs
        } else {
            d * (index + 1) as f64
        };
        TimeRange { start, end }
    }

    pub fn ranges(&self) -> impl Iterator<Item = TimeRange> + '_ {
        (0..self.slides).map(|i| self.range(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let timing = SlideTiming::even(30.0, 3);
        let ranges: Vec<_> = timing.ranges().collect();
        assert_eq!(ranges.len(), 3);
        assert!((ranges[0].start - 0.0).abs() < 1e-9);
        assert!((ranges[1].start - 10.0).abs() < 1e-9);
        assert!((ranges[2].end - 30.0).abs() < 1e-9);
        assert!((ranges.iter().map(TimeRange::duration).sum::<f64>() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_uneven_total_ends_on_total() {
        let timing = SlideTiming::even(10.0, 3);
        assert!((timing.range(2).end - 10.0).abs() < 1e-9);
        assert!((timing.range(0).end - timing.range(1).start).abs() < 1e-9);
    }
}
