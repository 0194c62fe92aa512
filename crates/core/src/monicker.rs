//! Random nickname generation.
//!
//! A pure function from `(sex, culture)` to a display name. Dedicated name
//! tables exist for the Chinese and Russian cultures; every other culture
//! falls back to the English table.

use rand::RngExt;

/// Player sex, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Sex::Male),
            1 => Some(Sex::Female),
            _ => None,
        }
    }
}

/// Name culture, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Culture {
    American,
    Argentinian,
    Australian,
    Brazilian,
    British,
    Bulgarian,
    Canadian,
    Chinese,
    Danish,
    Finnish,
    French,
    German,
    Kazakh,
    Mexican,
    Norwegian,
    Polish,
    Portuguese,
    Russian,
    Spanish,
    Swedish,
    Turkish,
    Ukrainian,
}

impl Culture {
    pub fn from_i32(value: i32) -> Option<Self> {
        use Culture::*;
        Some(match value {
            0 => American,
            1 => Argentinian,
            2 => Australian,
            3 => Brazilian,
            4 => British,
            5 => Bulgarian,
            6 => Canadian,
            7 => Chinese,
            8 => Danish,
            9 => Finnish,
            10 => French,
            11 => German,
            12 => Kazakh,
            13 => Mexican,
            14 => Norwegian,
            15 => Polish,
            16 => Portuguese,
            17 => Russian,
            18 => Spanish,
            19 => Swedish,
            20 => Turkish,
            21 => Ukrainian,
            _ => return None,
        })
    }
}

/// Source of random display names.
pub trait MonickerGenerator: Send + Sync {
    fn generate(&self, sex: Sex, culture: Culture) -> String;
}

struct NameTable {
    male: &'static [&'static str],
    female: &'static [&'static str],
    family: &'static [&'static str],
}

static ENGLISH: NameTable = NameTable {
    male: &[
        "James", "John", "Robert", "Michael", "William", "David", "Richard", "Joseph", "Thomas",
        "Charles", "Daniel", "Matthew",
    ],
    female: &[
        "Mary", "Patricia", "Jennifer", "Linda", "Elizabeth", "Barbara", "Susan", "Jessica",
        "Sarah", "Karen", "Nancy", "Lisa",
    ],
    family: &[
        "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Wilson",
        "Anderson", "Taylor", "Moore",
    ],
};

static CHINESE: NameTable = NameTable {
    male: &["Wei", "Jun", "Ming", "Hao", "Lei", "Qiang", "Bo", "Chao", "Feng", "Tao"],
    female: &["Li", "Fang", "Yan", "Xiu", "Ying", "Mei", "Na", "Jing", "Hui", "Lan"],
    family: &["Wang", "Li", "Zhang", "Liu", "Chen", "Yang", "Huang", "Zhao", "Wu", "Zhou"],
};

static RUSSIAN: NameTable = NameTable {
    male: &[
        "Aleksandr", "Dmitri", "Maksim", "Sergei", "Andrei", "Aleksei", "Artyom", "Ilya",
        "Kirill", "Mikhail",
    ],
    female: &[
        "Anastasia", "Maria", "Anna", "Viktoria", "Ekaterina", "Natalia", "Sofia", "Daria",
        "Alina", "Irina",
    ],
    family: &[
        "Ivanov", "Smirnov", "Kuznetsov", "Popov", "Vasiliev", "Petrov", "Sokolov", "Mikhailov",
        "Novikov", "Fedorov",
    ],
};

/// Default table-driven generator.
pub struct FakerNameGenerator;

impl MonickerGenerator for FakerNameGenerator {
    fn generate(&self, sex: Sex, culture: Culture) -> String {
        let table = match culture {
            Culture::Chinese => &CHINESE,
            Culture::Russian => &RUSSIAN,
            _ => &ENGLISH,
        };

        let mut rng = rand::rng();
        let first = match sex {
            Sex::Male => table.male[rng.random_range(0..table.male.len())],
            Sex::Female => table.female[rng.random_range(0..table.female.len())],
        };
        let family = table.family[rng.random_range(0..table.family.len())];
        format!("{first} {family}")
    }
}
