//! Voice Registry
//!
//! A fixed catalog of prebuilt synthetic voices and the selection policy used
//! to cast the two speakers of a listening dialogue.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    Female,
    Male,
}

impl fmt::Display for VoiceGender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceGender::Female => write!(f, "female"),
            VoiceGender::Male => write!(f, "male"),
        }
    }
}

/// An immutable synthetic-voice profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VoiceProfile {
    pub name: &'static str,
    pub gender: VoiceGender,
    pub style: &'static str,
}

const fn voice(name: &'static str, gender: VoiceGender, style: &'static str) -> VoiceProfile {
    VoiceProfile {
        name,
        gender,
        style,
    }
}

use VoiceGender::{Female, Male};

/// Prebuilt voices offered by the speech provider.
pub static VOICE_REGISTRY: &[VoiceProfile] = &[
    voice("zephyr", Female, "Bright"),
    voice("puck", Male, "Upbeat"),
    voice("charon", Male, "Informative"),
    voice("kore", Female, "Firm"),
    voice("fenrir", Male, "Excitable"),
    voice("leda", Female, "Youthful"),
    voice("orus", Male, "Firm"),
    voice("aoede", Female, "Breezy"),
    voice("callirrhoe", Female, "Easy-going"),
    voice("autonoe", Female, "Bright"),
    voice("enceladus", Male, "Breathy"),
    voice("iapetus", Male, "Clear"),
    voice("umbriel", Male, "Easy-going"),
    voice("algieba", Male, "Smooth"),
    voice("despina", Female, "Smooth"),
    voice("erinome", Female, "Clear"),
    voice("algenib", Male, "Gravelly"),
    voice("rasalgethi", Male, "Informative"),
    voice("laomedeia", Female, "Upbeat"),
    voice("achernar", Female, "Soft"),
    voice("alnilam", Male, "Firm"),
    voice("schedar", Male, "Even"),
    voice("gacrux", Female, "Mature"),
    voice("pulcherrima", Male, "Forward"),
    voice("achird", Male, "Friendly"),
    voice("zubenelgenubi", Male, "Casual"),
    voice("vindemiatrix", Female, "Gentle"),
    voice("sadachbia", Male, "Lively"),
    voice("sadaltager", Male, "Knowledgeable"),
    voice("sulafat", Female, "Warm"),
];

/// The profile used when a dialogue speaker has no assigned voice.
pub fn default_voice() -> &'static VoiceProfile {
    &VOICE_REGISTRY[0]
}

/// Looks a profile up by name, ignoring case.
pub fn find_voice(name: &str) -> Option<&'static VoiceProfile> {
    VOICE_REGISTRY
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(name.trim()))
}

/// Source of the random choices made during voice casting.
///
/// Injected so that tests can pin the outcome with a seed.
pub trait RandomSource: Send {
    /// Returns an index in `0..upper`. `upper` is never zero.
    fn next_index(&mut self, upper: usize) -> usize;
}

/// A [`RandomSource`] backed by `StdRng`.
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_index(&mut self, upper: usize) -> usize {
        self.rng.random_range(0..upper)
    }
}

/// Picks two voices for a two-speaker dialogue.
///
/// One female and one male profile are preferred. When a gender pool is
/// empty the remaining slot is filled from whatever is left of the registry,
/// never repeating a name. Only a registry with a single profile yields the
/// same profile twice; an empty registry yields `None`.
pub fn select_dialogue_voices(
    registry: &[VoiceProfile],
    rng: &mut dyn RandomSource,
) -> Option<[VoiceProfile; 2]> {
    let mut females: Vec<VoiceProfile> = registry
        .iter()
        .filter(|v| v.gender == VoiceGender::Female)
        .copied()
        .collect();
    let mut males: Vec<VoiceProfile> = registry
        .iter()
        .filter(|v| v.gender == VoiceGender::Male)
        .copied()
        .collect();

    let mut selected: Vec<VoiceProfile> = Vec::with_capacity(2);
    if !females.is_empty() {
        let i = rng.next_index(females.len());
        selected.push(females.swap_remove(i));
    }
    if !males.is_empty() {
        let i = rng.next_index(males.len());
        selected.push(males.swap_remove(i));
    }

    let mut remaining: Vec<VoiceProfile> = registry
        .iter()
        .filter(|v| !selected.iter().any(|s| s.name == v.name))
        .copied()
        .collect();
    while selected.len() < 2 && !remaining.is_empty() {
        let i = rng.next_index(remaining.len());
        let pick = remaining.swap_remove(i);
        remaining.retain(|v| v.name != pick.name);
        selected.push(pick);
    }

    let first = *selected.first()?;
    let second = selected.get(1).copied().unwrap_or(first);
    Some([first, second])
}
