//! Spell vocabulary and payoff effects.

use crate::infrastructure::bluetooth::macros::{LedGroup, Macro};
use std::fmt;

/// Classifier output labels, index-aligned with the model's probability vector.
pub const SPELL_NAMES: [&str; 73] = [
    "The_Force_Spell",
    "Colloportus",
    "Colloshoo",
    "The_Hour_Reversal_Reversal_Charm",
    "Evanesco",
    "Herbivicus",
    "Orchideous",
    "Brachiabindo",
    "Meteolojinx",
    "Riddikulus",
    "Silencio",
    "Immobulus",
    "Confringo",
    "Petrificus_Totalus",
    "Flipendo",
    "The_Cheering_Charm",
    "Salvio_Hexia",
    "Pestis_Incendium",
    "Alohomora",
    "Protego",
    "Langlock",
    "Mucus_Ad_Nauseum",
    "Flagrate",
    "Glacius",
    "Finite",
    "Anteoculatia",
    "Expelliarmus",
    "Expecto_Patronum",
    "Descendo",
    "Depulso",
    "Reducto",
    "Colovaria",
    "Aberto",
    "Confundo",
    "Densaugeo",
    "The_Stretching_Jinx",
    "Entomorphis",
    "The_Hair_Thickening_Growing_Charm",
    "Bombarda",
    "Finestra",
    "The_Sleeping_Charm",
    "Rictusempra",
    "Piertotum_Locomotor",
    "Expulso",
    "Impedimenta",
    "Ascendio",
    "Incarcerous",
    "Ventus",
    "Revelio",
    "Accio",
    "Melefors",
    "Scourgify",
    "Wingardium_Leviosa",
    "Nox",
    "Stupefy",
    "Spongify",
    "Lumos",
    "Appare_Vestigium",
    "Verdimillious",
    "Fulgari",
    "Reparo",
    "Locomotor",
    "Quietus",
    "Everte_Statum",
    "Incendio",
    "Aguamenti",
    "Sonorus",
    "Cantis",
    "Arania_Exumai",
    "Calvorio",
    "The_Hour_Reversal_Charm",
    "Vermillious",
    "The_Pepper-Breath_Hex",
];

/// A recognised spell: an index into [`SPELL_NAMES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpellLabel(usize);

impl SpellLabel {
    pub fn from_index(index: usize) -> Option<Self> {
        (index < SPELL_NAMES.len()).then_some(Self(index))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let key = normalize_spell_name(name);
        SPELL_NAMES
            .iter()
            .position(|candidate| normalize_spell_name(candidate) == key)
            .map(Self)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    /// Vocabulary name, e.g. `Wingardium_Leviosa`
    pub fn name(&self) -> &'static str {
        SPELL_NAMES[self.0]
    }

    /// Human form, e.g. `Wingardium Leviosa`
    pub fn display_name(&self) -> String {
        self.name().replace('_', " ")
    }
}

impl fmt::Display for SpellLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowercase with spaces and hyphens folded to underscores.
pub fn normalize_spell_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Buzz(u32),
    /// group, 0xRRGGBB, duration
    Led(LedGroup, u32, u32),
    Delay(u32),
    Clear,
}

use crate::infrastructure::bluetooth::macros::LedGroup::{MidLower, MidUpper, Pommel, Tip};
use self::Step::{Buzz, Clear, Delay, Led};

/// Payoff effect per spell, sorted by normalized name.
const PAYOFFS: &[(&str, &[Step])] = &[
    ("aberto", &[Buzz(200), Led(Tip, 0xFFDD66, 300), Delay(200), Clear]),
    ("accio", &[Buzz(200), Led(Tip, 0x6688FF, 300), Led(MidUpper, 0x4466DD, 250), Delay(200), Clear]),
    ("aguamenti", &[Buzz(200), Led(Tip, 0x0066FF, 400), Led(MidUpper, 0x00AAFF, 300), Delay(200), Clear]),
    ("alohomora", &[Buzz(200), Led(Tip, 0xFFD700, 300), Led(MidUpper, 0xFFAA00, 250), Delay(200), Clear]),
    ("anteoculatia", &[Buzz(200), Led(Tip, 0x8B4513, 300), Led(MidUpper, 0xA0522D, 250), Delay(200), Clear]),
    ("appare_vestigium", &[Buzz(250), Led(Tip, 0xFFDD00, 300), Led(MidUpper, 0xFFCC00, 300), Delay(300), Clear]),
    ("arania_exumai", &[Buzz(300), Led(Tip, 0xFFFFFF, 200), Led(MidUpper, 0xFFFF00, 150), Delay(150), Clear]),
    ("ascendio", &[Buzz(250), Led(Pommel, 0x88AAFF, 100), Delay(50), Led(MidLower, 0x88AAFF, 100), Delay(50), Led(MidUpper, 0x88AAFF, 100), Delay(50), Led(Tip, 0xAACCFF, 200), Delay(100), Clear]),
    ("avada_kedavra", &[Buzz(500), Led(Tip, 0x00FF00, 100), Led(MidUpper, 0x00FF00, 100), Led(MidLower, 0x00FF00, 100), Led(Pommel, 0x00FF00, 100), Delay(200), Clear]),
    ("bombarda", &[Buzz(500), Led(Tip, 0xFF4500, 150), Led(MidUpper, 0xFF4500, 120), Led(MidLower, 0xFF6600, 100), Led(Pommel, 0xFF8800, 80), Delay(150), Clear]),
    ("brachiabindo", &[Buzz(250), Led(Tip, 0x996633, 300), Delay(200), Clear]),
    ("calvorio", &[Buzz(150), Led(Tip, 0xFFEECC, 200), Delay(150), Clear]),
    ("cantis", &[Buzz(200), Led(Tip, 0xFFCC99, 250), Led(MidUpper, 0xFFAA88, 20), Delay(200), Clear]),
    ("colloportus", &[Buzz(250), Led(Tip, 0x886633, 300), Led(MidUpper, 0x664422, 250), Delay(200), Clear]),
    ("colloshoo", &[Buzz(200), Led(Tip, 0xAA8844, 300), Delay(200), Clear]),
    ("colovaria", &[Buzz(200), Led(Tip, 0xFF0000, 200), Delay(100), Led(Tip, 0x00FF00, 200), Delay(100), Led(Tip, 0x0000FF, 200), Delay(100), Clear]),
    ("confringo", &[Buzz(400), Led(Tip, 0xFF0000, 100), Led(MidUpper, 0xFF4500, 100), Led(MidLower, 0xFF6600, 100), Led(Pommel, 0xFFFF00, 100), Delay(200), Clear]),
    ("confundo", &[Buzz(250), Led(Tip, 0xFFAAFF, 200), Delay(100), Led(Tip, 0xAAFFFF, 200), Delay(100), Led(Tip, 0xFFFFAA, 200), Delay(150), Clear]),
    ("densaugeo", &[Buzz(200), Led(Tip, 0xFFFFCC, 250), Delay(150), Clear]),
    ("depulso", &[Buzz(300), Led(Tip, 0xFF8844, 250), Led(MidUpper, 0xFF6622, 200), Delay(200), Clear]),
    ("descendo", &[Buzz(200), Led(Tip, 0x88AAFF, 100), Delay(50), Led(MidUpper, 0x88AAFF, 100), Delay(50), Led(MidLower, 0x88AAFF, 100), Delay(50), Led(Pommel, 0x6688DD, 200), Delay(100), Clear]),
    ("entomorphis", &[Buzz(200), Led(Tip, 0x336633, 250), Delay(150), Clear]),
    ("evanesco", &[Buzz(200), Led(Tip, 0xFFFFFF, 200), Delay(100), Led(Tip, 0x888888, 150), Delay(100), Led(Tip, 0x444444, 100), Delay(100), Clear]),
    ("everte_statum", &[Buzz(300), Led(Tip, 0xFF6644, 200), Led(MidUpper, 0xFF4422, 150), Delay(150), Clear]),
    ("expecto_patronum", &[Buzz(400), Led(Tip, 0xE0E0FF, 300), Led(MidUpper, 0xC0C0FF, 300), Led(MidLower, 0xA0A0FF, 300), Led(Pommel, 0x8080FF, 300), Delay(500), Led(Tip, 0xFFFFFF, 1000), Delay(500), Clear]),
    ("expelliarmus", &[Buzz(300), Led(Tip, 0xFF0000, 200), Led(MidUpper, 0xFF0000, 150), Led(Pommel, 0xFF0000, 100), Delay(300), Clear]),
    ("expulso", &[Buzz(400), Led(Tip, 0xFF6600, 150), Led(MidUpper, 0xFF3300, 150), Delay(100), Led(Tip, 0xFFAA00, 200), Delay(150), Clear]),
    ("finestra", &[Buzz(300), Led(Tip, 0xFFFFFF, 150), Led(MidUpper, 0xCCCCFF, 100), Delay(100), Clear]),
    ("finite", &[Buzz(200), Led(Tip, 0xAAAAFF, 200), Delay(100), Led(Tip, 0x6666FF, 200), Delay(150), Clear]),
    ("flagrate", &[Buzz(150), Led(Tip, 0xFF6600, 400), Led(MidUpper, 0xFF3300, 300), Delay(300), Led(Tip, 0xFF9900, 300), Delay(200), Clear]),
    ("flipendo", &[Buzz(250), Led(Tip, 0xFF6633, 200), Led(MidUpper, 0xFF4422, 150), Delay(150), Clear]),
    ("fulgari", &[Buzz(250), Led(Tip, 0xFFFF00, 300), Led(MidUpper, 0xFFFF00, 250), Led(MidLower, 0xFFFF00, 200), Delay(300), Clear]),
    ("glacius", &[Buzz(250), Led(Tip, 0x00FFFF, 400), Led(MidUpper, 0x88FFFF, 300), Led(MidLower, 0xAAFFFF, 250), Delay(300), Clear]),
    ("herbivicus", &[Buzz(200), Led(Tip, 0x00AA00, 300), Led(MidUpper, 0x00DD00, 250), Led(MidLower, 0x00FF00, 200), Delay(250), Clear]),
    ("immobulus", &[Buzz(250), Led(Tip, 0x88FFFF, 350), Led(MidUpper, 0x66DDDD, 300), Delay(250), Clear]),
    ("impedimenta", &[Buzz(300), Led(Tip, 0x8888FF, 300), Led(MidUpper, 0x6666DD, 250), Delay(200), Clear]),
    ("incarcerous", &[Buzz(300), Led(Tip, 0x8B4513, 300), Led(MidUpper, 0xA0522D, 250), Delay(200), Clear]),
    ("incendio", &[Buzz(200), Led(Tip, 0xFF4500, 300), Led(MidUpper, 0xFF6600, 200), Delay(100), Led(Tip, 0xFF0000, 300), Delay(200), Clear]),
    ("langlock", &[Buzz(200), Led(Tip, 0xAA6666, 250), Delay(150), Clear]),
    ("locomotor", &[Buzz(200), Led(Tip, 0x6699FF, 250), Delay(100), Led(Tip, 0x99AAFF, 250), Delay(150), Clear]),
    ("lumos", &[Buzz(150), Led(Tip, 0xFFFFFF, 2000)]),
    ("melefors", &[Buzz(200), Led(Tip, 0xFF8800, 300), Led(MidUpper, 0xFF6600, 250), Delay(200), Clear]),
    ("meteolojinx", &[Buzz(250), Led(Tip, 0x666688, 300), Led(MidUpper, 0x888899, 250), Delay(150), Led(Tip, 0xFFFF00, 100), Delay(10), Clear]),
    ("mucus_ad_nauseum", &[Buzz(200), Led(Tip, 0x66FF66, 250), Delay(150), Clear]),
    ("nox", &[Buzz(100), Led(Tip, 0x330033, 200), Delay(100), Clear]),
    ("orchideous", &[Buzz(200), Led(Tip, 0xFF66FF, 300), Led(MidUpper, 0xFF99FF, 250), Delay(200), Clear]),
    ("pestis_incendium", &[Buzz(300), Led(Tip, 0xFF0000, 200), Led(MidUpper, 0xFF3300, 200), Led(MidLower, 0xFF6600, 200), Led(Pommel, 0xFF9900, 200), Delay(300), Clear]),
    ("petrificus_totalus", &[Buzz(350), Led(Tip, 0xCCCCCC, 300), Led(MidUpper, 0xAAAAAA, 250), Led(MidLower, 0x888888, 200), Delay(300), Clear]),
    ("piertotum_locomotor", &[Buzz(350), Led(Tip, 0xCCCCCC, 250), Led(MidUpper, 0xAAAAAA, 250), Led(MidLower, 0x888888, 200), Led(Pommel, 0x666666, 150), Delay(300), Clear]),
    ("protego", &[Buzz(200), Led(Tip, 0x0055FF, 500), Led(MidUpper, 0x0055FF, 400), Led(MidLower, 0x0055FF, 300), Delay(300), Clear]),
    ("quietus", &[Buzz(150), Led(Tip, 0x666688, 250), Delay(150), Clear]),
    ("reducto", &[Buzz(350), Led(Tip, 0xFF3300, 200), Delay(50), Led(Tip, 0xFFAA00, 150), Delay(100), Clear]),
    ("reparo", &[Buzz(200), Led(Tip, 0xFFDD88, 300), Led(MidUpper, 0xFFCC66, 250), Delay(200), Clear]),
    ("revelio", &[Buzz(200), Led(Tip, 0xFFFFFF, 150), Led(MidUpper, 0xFFFF88, 150), Led(MidLower, 0xFFFF00, 150), Delay(200), Clear]),
    ("rictusempra", &[Buzz(200), Led(Tip, 0xFFAACC, 200), Delay(100), Led(Tip, 0xFFCCDD, 200), Delay(150), Clear]),
    ("riddikulus", &[Buzz(250), Led(Tip, 0xFFFF00, 200), Led(MidUpper, 0xFF00FF, 200), Led(MidLower, 0x00FFFF, 200), Delay(200), Clear]),
    ("salvio_hexia", &[Buzz(250), Led(Tip, 0x6666FF, 400), Led(MidUpper, 0x4444FF, 350), Led(MidLower, 0x2222FF, 300), Led(Pommel, 0x0000FF, 250), Delay(250), Clear]),
    ("scourgify", &[Buzz(150), Led(Tip, 0x88DDFF, 300), Delay(200), Clear]),
    ("silencio", &[Buzz(150), Led(Tip, 0x9999AA, 300), Delay(200), Clear]),
    ("sonorus", &[Buzz(200), Led(Tip, 0xFFAA66, 250), Delay(150), Clear]),
    ("spell_fail", &[Buzz(100), Led(Tip, 0xFF0000, 200), Delay(100), Led(Tip, 0x000000, 100), Delay(100), Led(Tip, 0xFF0000, 200), Delay(100), Clear]),
    ("spell_success", &[Buzz(200), Led(Tip, 0x00FF00, 300), Delay(200), Clear]),
    ("spongify", &[Buzz(150), Led(Tip, 0xFFCCFF, 300), Delay(200), Clear]),
    ("stupefy", &[Buzz(250), Led(Tip, 0xFF0000, 150), Delay(50), Led(Tip, 0x880000, 150), Delay(50), Led(Tip, 0xFF0000, 150), Delay(100), Clear]),
    ("the_cheering_charm", &[Buzz(200), Led(Tip, 0xFFFF00, 300), Led(MidUpper, 0xFFDD00, 250), Delay(200), Clear]),
    ("the_force_spell", &[Buzz(350), Led(Tip, 0x88AAFF, 250), Led(MidUpper, 0x6688DD, 200), Delay(200), Clear]),
    ("the_hair_thickening_growing_charm", &[Buzz(200), Led(Tip, 0x8B4513, 300), Delay(200), Clear]),
    ("the_hour_reversal_charm", &[Buzz(300), Led(Tip, 0xFFDD88, 200), Led(MidUpper, 0xDDBB66, 200), Led(MidLower, 0xBB9944, 200), Led(Pommel, 0x997722, 200), Delay(250), Clear]),
    ("the_hour_reversal_reversal_charm", &[Buzz(300), Led(Pommel, 0x997722, 200), Led(MidLower, 0xBB9944, 200), Led(MidUpper, 0xDDBB66, 200), Led(Tip, 0xFFDD88, 200), Delay(250), Clear]),
    ("the_pepper_breath_hex", &[Buzz(250), Led(Tip, 0xFF4400, 300), Led(MidUpper, 0xFF6600, 250), Delay(200), Clear]),
    ("the_sleeping_charm", &[Buzz(150), Led(Tip, 0x6666AA, 400), Delay(300), Clear]),
    ("the_stretching_jinx", &[Buzz(200), Led(Tip, 0xFFAA88, 300), Delay(200), Clear]),
    ("ventus", &[Buzz(200), Led(Tip, 0x88CCFF, 200), Delay(100), Led(Tip, 0xAADDFF, 200), Delay(100), Led(Tip, 0x88CCFF, 200), Delay(100), Clear]),
    ("verdimillious", &[Buzz(200), Led(Tip, 0x00FF00, 200), Led(MidUpper, 0x00AA00, 150), Delay(100), Led(Tip, 0x00FF00, 150), Delay(200), Clear]),
    ("vermillious", &[Buzz(200), Led(Tip, 0xFF0000, 200), Led(MidUpper, 0xAA0000, 150), Delay(100), Led(Tip, 0xFF0000, 150), Delay(200), Clear]),
    ("wingardium_leviosa", &[Buzz(150), Led(Tip, 0xFFFFAA, 300), Delay(200), Led(Tip, 0xFFFF66, 300), Delay(200), Led(Tip, 0xFFFFAA, 300), Delay(300), Clear]),
];

/// Compiled payoff macro for a spell name in any casing.
pub fn spell_macro(name: &str) -> Option<Macro> {
    let key = normalize_spell_name(name);
    let index = PAYOFFS
        .binary_search_by(|(candidate, _)| (*candidate).cmp(key.as_str()))
        .ok()?;
    let (_, steps) = PAYOFFS[index];

    let compiled = steps.iter().fold(Macro::new(), |m, step| match *step {
        Buzz(ms) => m.add_buzz(ms),
        Led(group, rgb, ms) => m.add_led_rgb(group, rgb, ms),
        Delay(ms) => m.add_delay(ms),
        Clear => m.add_clear(),
    });
    Some(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::macros::MacroCommand;

    #[test]
    fn test_vocabulary_lookup() {
        let label = SpellLabel::from_index(0).unwrap();
        assert_eq!(label.name(), "The_Force_Spell");
        assert_eq!(label.display_name(), "The Force Spell");
        assert_eq!(SpellLabel::from_index(SPELL_NAMES.len()), None);
        assert_eq!(
            SpellLabel::from_name("wingardium leviosa").map(|l| l.name()),
            Some("Wingardium_Leviosa")
        );
    }

    #[test]
    fn test_payoff_table_is_sorted() {
        assert!(PAYOFFS.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn test_every_spell_has_a_payoff() {
        for name in SPELL_NAMES {
            assert!(spell_macro(name).is_some(), "missing payoff for {name}");
        }
    }

    #[test]
    fn test_spell_macro_normalizes_names() {
        let a = spell_macro("The Pepper-Breath Hex").unwrap();
        let b = spell_macro("the_pepper_breath_hex").unwrap();
        assert_eq!(a, b);
        assert!(spell_macro("not a spell").is_none());
    }

    #[test]
    fn test_lumos_keeps_light_on() {
        let lumos = spell_macro("Lumos").unwrap();
        assert_eq!(
            lumos.commands(),
            &[
                MacroCommand::Buzz { duration_ms: 150 },
                MacroCommand::ChangeLed {
                    group: 0,
                    r: 0xFF,
                    g: 0xFF,
                    b: 0xFF,
                    duration_ms: 2000
                },
            ]
        );
    }
}
