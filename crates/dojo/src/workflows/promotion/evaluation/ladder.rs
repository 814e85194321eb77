use super::super::domain::{Belt, BeltId};

/// A program's belts in rank order (ascending `display_order`).
#[derive(Debug, Clone, Default)]
pub struct BeltLadder {
    belts: Vec<Belt>,
}

impl BeltLadder {
    pub fn new(mut belts: Vec<Belt>) -> Self {
        belts.sort_by_key(|belt| belt.display_order);
        Self { belts }
    }

    pub fn belts(&self) -> &[Belt] {
        &self.belts
    }

    pub fn is_empty(&self) -> bool {
        self.belts.is_empty()
    }

    pub fn find(&self, belt_id: &BeltId) -> Option<&Belt> {
        self.belts.iter().find(|belt| &belt.id == belt_id)
    }

    /// Lowest belt strictly above `current_order`; the lowest belt overall when unranked.
    pub fn next_after(&self, current_order: Option<u32>) -> Option<&Belt> {
        match current_order {
            None => self.belts.first(),
            Some(order) => self.belts.iter().find(|belt| belt.display_order > order),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::promotion::domain::ProgramId;

    fn belt(name: &str, order: u32) -> Belt {
        Belt {
            id: BeltId::new(name.to_ascii_lowercase()),
            program_id: ProgramId::new("karate"),
            name: name.to_string(),
            display_order: order,
            color: None,
            description: None,
        }
    }

    #[test]
    fn orders_belts_and_finds_the_next_rank() {
        let ladder = BeltLadder::new(vec![belt("Green", 3), belt("White", 1), belt("Yellow", 2)]);

        let names: Vec<_> = ladder.belts().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["White", "Yellow", "Green"]);
        assert_eq!(ladder.next_after(None).map(|b| b.name.as_str()), Some("White"));
        assert_eq!(ladder.next_after(Some(1)).map(|b| b.name.as_str()), Some("Yellow"));
        assert!(ladder.next_after(Some(3)).is_none());
    }

    #[test]
    fn skips_gaps_in_display_order() {
        let ladder = BeltLadder::new(vec![belt("White", 1), belt("Black", 10)]);
        assert_eq!(ladder.next_after(Some(1)).map(|b| b.name.as_str()), Some("Black"));
        assert_eq!(ladder.next_after(Some(5)).map(|b| b.name.as_str()), Some("Black"));
    }

    #[test]
    fn empty_ladder_has_no_next_belt() {
        assert!(BeltLadder::new(Vec::new()).next_after(None).is_none());
    }
}
