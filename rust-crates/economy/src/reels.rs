use serde::{
    Deserialize,
    Serialize,
};

/// Highest raw outcome the three-reel slot can report.
pub const MAX_ROLL_VALUE: u8 = 64;

#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum Symbol {
    Bar,
    Cherry,
    Lemon,
    Seven,
}

impl Symbol {
    pub const ALL: [Symbol; 4] = [Symbol::Bar, Symbol::Cherry, Symbol::Lemon, Symbol::Seven];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        match self {
            Symbol::Bar => 0,
            Symbol::Cherry => 1,
            Symbol::Lemon => 2,
            Symbol::Seven => 3,
        }
    }

    pub fn stake_weight(self) -> i64 {
        match self {
            Symbol::Bar => 1,
            Symbol::Cherry => 1,
            Symbol::Lemon => 2,
            Symbol::Seven => 3,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Reels(pub [Symbol; 3]);

impl Reels {
    /// Split a combined outcome in `1..=64` into three 2-bit reels, lowest bits first.
    pub fn decode(value: u8) -> Option<Self> {
        if !(1..=MAX_ROLL_VALUE).contains(&value) {
            return None;
        }
        let raw = value - 1;
        let reel = |shift: u8| Symbol::from_index((raw >> shift) & 0b11);
        Some(Reels([reel(0)?, reel(2)?, reel(4)?]))
    }

    pub fn symbols(&self) -> &[Symbol; 3] {
        &self.0
    }

    pub fn rolls_sum(&self) -> i64 {
        self.0.iter().map(|symbol| symbol.stake_weight()).sum()
    }

    /// Most frequent symbol and its count; ties go to the symbol seen first.
    pub fn modal(&self) -> (Symbol, u8) {
        let mut best = (self.0[0], 0u8);
        for symbol in self.0 {
            let count = self.0.iter().filter(|other| **other == symbol).count() as u8;
            if count > best.1 {
                best = (symbol, count);
            }
        }
        best
    }

    pub fn prize(&self) -> i64 {
        let sum = self.rolls_sum();
        match self.modal() {
            (Symbol::Seven, 3) => 77,
            (Symbol::Lemon, 3) => 30,
            (Symbol::Cherry, 3) => 23,
            (Symbol::Bar, 3) => 21,
            (Symbol::Seven, 2) => 10 + sum,
            (Symbol::Lemon, 2) => 6 + sum,
            (_, 2) => 4 + sum,
            _ => sum - 3,
        }
    }
}
