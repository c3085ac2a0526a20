use rand::{
    Rng,
    seq::{
        IndexedRandom,
        index,
    },
};
use serde::{
    Deserialize,
    Serialize,
};

/// Number of symbols offered in one challenge.
pub const CHOICES: usize = 6;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

pub const CATALOG: [(&str, &str); 24] = [
    ("🍎", "apple"),
    ("🍌", "banana"),
    ("🍕", "pizza"),
    ("🚗", "car"),
    ("🐶", "dog"),
    ("🐱", "cat"),
    ("🎸", "guitar"),
    ("🚀", "rocket"),
    ("🍄", "mushroom"),
    ("☀️", "sun"),
    ("🔑", "key"),
    ("🎁", "present"),
    ("🌵", "cactus"),
    ("⚓️", "anchor"),
    ("🎈", "balloon"),
    ("📱", "phone"),
    ("👓", "glasses"),
    ("💎", "diamond"),
    ("🍉", "watermelon"),
    ("🌋", "volcano"),
    ("🧊", "icecube"),
    ("🦉", "owl"),
    ("🐢", "turtle"),
    ("🐝", "bee"),
];

/// A corrupted word together with the symbols the user picks from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub pattern: String,
    pub target_index: usize,
    pub items: Vec<String>,
}

impl CaptchaChallenge {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let picked: Vec<&(&str, &str)> = CATALOG.choose_multiple(rng, CHOICES).collect();
        let target_index = rng.random_range(0..picked.len());
        let (_, word) = picked[target_index];
        Self {
            pattern: corrupt(word, rng),
            target_index,
            items: picked.iter().map(|(emoji, _)| emoji.to_string()).collect(),
        }
    }

    pub fn verify(&self, index: usize) -> bool {
        index == self.target_index
    }
}

/// Replace `round(len / 4)` distinct characters, each by a random letter or `_`.
pub fn corrupt<R: Rng + ?Sized>(word: &str, rng: &mut R) -> String {
    let chars: Vec<char> = word.chars().collect();
    let replacements = (chars.len() + 2) / 4;
    let mut targets = vec![false; chars.len()];
    for position in index::sample(rng, chars.len(), replacements) {
        targets[position] = true;
    }
    chars
        .into_iter()
        .zip(targets)
        .map(|(char, replace)| {
            if !replace {
                char
            } else if rng.random_bool(0.5) {
                ALPHABET[rng.random_range(0..ALPHABET.len())] as char
            } else {
                '_'
            }
        })
        .collect()
}
