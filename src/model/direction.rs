#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    En,
    Ko,
}

/// Translation direction of one encode/decode pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    EnToKo,
    KoToEn,
}

impl Direction {
    pub fn source(self) -> Language {
        match self {
            Direction::EnToKo => Language::En,
            Direction::KoToEn => Language::Ko,
        }
    }

    pub fn target(self) -> Language {
        self.opposite().source()
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::EnToKo => Direction::KoToEn,
            Direction::KoToEn => Direction::EnToKo,
        }
    }
}
