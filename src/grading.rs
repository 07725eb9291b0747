use serde::Serialize;

/// Letter grade plus the grade point it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub letter: char,
    pub point: u8,
}

const GRADE_TABLE: [(char, u8); 6] = [
    ('A', 5),
    ('B', 4),
    ('C', 3),
    ('D', 2),
    ('E', 1),
    ('F', 0),
];

/// Maps a course total (CA + exam, 0..=100) to its grade band.
///
/// Bands: 70+ A, 60-69 B, 50-59 C, 45-49 D, 40-44 E, below 40 F.
/// Totals outside 0..=100 must be rejected before this is called; they land
/// in the nearest band instead of panicking.
pub fn classify(total_score: i64) -> Grade {
    let letter = if total_score >= 70 {
        'A'
    } else if total_score >= 60 {
        'B'
    } else if total_score >= 50 {
        'C'
    } else if total_score >= 45 {
        'D'
    } else if total_score >= 40 {
        'E'
    } else {
        'F'
    };
    Grade {
        letter,
        point: point_for(letter),
    }
}

fn point_for(letter: char) -> u8 {
    GRADE_TABLE
        .iter()
        .find(|(l, _)| *l == letter)
        .map(|(_, p)| *p)
        .unwrap_or(0)
}

/// Grade point for a letter chosen directly (the standalone calculator path).
pub fn grade_point_for_letter(letter: &str) -> Option<u8> {
    let mut chars = letter.trim().chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() {
        return None;
    }
    GRADE_TABLE.iter().find(|(l, _)| *l == c).map(|(_, p)| *p)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    pub grade_point: u8,
    pub credit_unit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CgpSummary {
    pub total_credit_units: u64,
    pub total_grade_points: u64,
    /// Two-decimal display form, e.g. "4.00".
    pub cgp: String,
    #[serde(skip)]
    pub cgp_hundredths: u64,
    pub classification: &'static str,
}

pub fn aggregate<I>(contributions: I) -> CgpSummary
where
    I: IntoIterator<Item = Contribution>,
{
    let mut total_credit_units: u64 = 0;
    let mut total_grade_points: u64 = 0;
    for c in contributions {
        total_credit_units += u64::from(c.credit_unit);
        total_grade_points += u64::from(c.grade_point) * u64::from(c.credit_unit);
    }

    // Half-up at the second decimal, in integers: round(100 * gp / cu).
    // Widened so huge credit totals cannot overflow; the result is at most 500.
    let cgp_hundredths = if total_credit_units == 0 {
        0
    } else {
        let gp = u128::from(total_grade_points);
        let cu = u128::from(total_credit_units);
        ((gp * 200 + cu) / (2 * cu)) as u64
    };

    CgpSummary {
        total_credit_units,
        total_grade_points,
        cgp: format!("{}.{:02}", cgp_hundredths / 100, cgp_hundredths % 100),
        cgp_hundredths,
        classification: classification_for_hundredths(cgp_hundredths),
    }
}

fn classification_for_hundredths(h: u64) -> &'static str {
    if h >= 450 {
        "Distinction"
    } else if h >= 350 {
        "Upper Credit"
    } else if h >= 250 {
        "Lower Credit"
    } else if h >= 200 {
        "Pass"
    } else {
        "Fail"
    }
}
