//! Multi-timeframe alignment summary

use serde::Serialize;

use crate::types::{Direction, Instrument, Interval};

/// Per-interval directions for one instrument and the aligned verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alignment {
    pub instrument: Instrument,
    pub directions: Vec<(Interval, Direction)>,
    pub aligned: Direction,
}

impl Alignment {
    pub fn new(instrument: Instrument, mut directions: Vec<(Interval, Direction)>) -> Self {
        directions.sort_by_key(|(interval, _)| *interval);
        let aligned = align(directions.iter().map(|(_, d)| *d));
        Self {
            instrument,
            directions,
            aligned,
        }
    }
}

/// BUY when at least two intervals say BUY and none SELL; SELL mirrored.
pub fn align(directions: impl IntoIterator<Item = Direction>) -> Direction {
    let (buys, sells) = directions
        .into_iter()
        .fold((0usize, 0usize), |(b, s), d| match d {
            Direction::Buy => (b + 1, s),
            Direction::Sell => (b, s + 1),
            Direction::Flat => (b, s),
        });

    match (buys, sells) {
        (b, 0) if b >= 2 => Direction::Buy,
        (0, s) if s >= 2 => Direction::Sell,
        _ => Direction::Flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Direction::*;

    #[test]
    fn test_align() {
        assert_eq!(align([Buy, Buy, Flat]), Buy);
        assert_eq!(align([Sell, Flat, Sell, Sell]), Sell);
        assert_eq!(align([Buy, Buy, Sell]), Flat);
        assert_eq!(align([Buy, Flat, Flat]), Flat);
        assert_eq!(align([]), Flat);
    }

    #[test]
    fn test_alignment_sorted_by_interval() {
        let alignment = Alignment::new(
            Instrument::new("GOLD"),
            vec![(Interval::D1, Buy), (Interval::M5, Buy), (Interval::H1, Flat)],
        );
        assert_eq!(alignment.aligned, Buy);
        assert_eq!(alignment.directions[0].0, Interval::M5);
        assert_eq!(alignment.directions[2].0, Interval::D1);
    }
}
