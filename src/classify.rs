use serde::Serialize;
use std::collections::HashSet;

/// UK honours band derived from a credit-weighted average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    #[serde(rename = "1st")]
    First,
    #[serde(rename = "2:1")]
    UpperSecond,
    #[serde(rename = "2:2")]
    LowerSecond,
    #[serde(rename = "3rd")]
    Third,
    #[serde(rename = "Fail")]
    Fail,
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl Classification {
    /// Bands are inclusive lower bounds, checked highest first.
    pub fn from_average(average: f64) -> Self {
        if average >= 70.0 {
            Self::First
        } else if average >= 60.0 {
            Self::UpperSecond
        } else if average >= 50.0 {
            Self::LowerSecond
        } else if average >= 40.0 {
            Self::Third
        } else {
            Self::Fail
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::First => "1st",
            Self::UpperSecond => "2:1",
            Self::LowerSecond => "2:2",
            Self::Third => "3rd",
            Self::Fail => "Fail",
            Self::NotAvailable => "N/A",
        }
    }

    pub fn full_name(self) -> &'static str {
        match self {
            Self::First => "First Class Honours",
            Self::UpperSecond => "Upper Second Class Honours",
            Self::LowerSecond => "Lower Second Class Honours",
            Self::Third => "Third Class Honours",
            Self::Fail => "Fail",
            Self::NotAvailable => "No marks available",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationColor {
    Gold,
    Blue,
    Silver,
    Bronze,
    Red,
    Gray,
}

/// One module result weighted by its CATS credits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedMark {
    pub mark: f64,
    pub credits: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub average_mark: f64,
    pub classification: Classification,
    pub classification_full: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksValidation {
    pub is_valid: bool,
    pub missing_modules: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsValidation {
    pub is_valid: bool,
    pub total_credits: i64,
    pub difference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeError {
    pub index: usize,
    pub field: &'static str,
    pub value: f64,
}

impl RangeError {
    pub fn message(&self) -> String {
        match self.field {
            "mark" => format!(
                "marks[{}].mark must be a number in 0..=100 (got {})",
                self.index, self.value
            ),
            _ => format!(
                "marks[{}].credits must be >= 0 (got {})",
                self.index, self.value
            ),
        }
    }
}

/// Credit sums are taken in `i128` and clamped back, so no input overflows.
fn clamp_to_i64(v: i128) -> i64 {
    i64::try_from(v).unwrap_or(if v < 0 { i64::MIN } else { i64::MAX })
}

/// Two-decimal rounding, half away from zero.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Credit-weighted average and honours band.
///
/// Inputs are not range-checked; callers that want that use
/// [`check_mark_ranges`] first. The band is picked from the unrounded
/// average, `average_mark` is the two-decimal rounding of it.
pub fn calculate_degree_classification<I>(marks: I) -> ClassificationResult
where
    I: IntoIterator<Item = WeightedMark>,
{
    let mut count: usize = 0;
    let mut weighted_sum: f64 = 0.0;
    let mut total_credits: i128 = 0;

    for m in marks {
        count += 1;
        weighted_sum += m.mark * (m.credits as f64);
        total_credits += i128::from(m.credits);
    }

    if count == 0 {
        let na = Classification::NotAvailable;
        return ClassificationResult {
            average_mark: 0.0,
            classification: na,
            classification_full: na.full_name(),
        };
    }

    let average = if total_credits > 0 {
        weighted_sum / (total_credits as f64)
    } else {
        0.0
    };
    let classification = Classification::from_average(average);

    ClassificationResult {
        average_mark: round_2_decimals(average),
        classification,
        classification_full: classification.full_name(),
    }
}

pub fn classification_color(code: &str) -> ClassificationColor {
    match code {
        "1st" => ClassificationColor::Gold,
        "2:1" => ClassificationColor::Blue,
        "2:2" => ClassificationColor::Silver,
        "3rd" => ClassificationColor::Bronze,
        "Fail" => ClassificationColor::Red,
        _ => ClassificationColor::Gray,
    }
}

/// Required module ids that have no mark, in `module_ids` order.
pub fn validate_all_marks_assigned<'m, 'k, M, K>(module_ids: M, marked_ids: K) -> MarksValidation
where
    M: IntoIterator<Item = &'m str>,
    K: IntoIterator<Item = &'k str>,
{
    let marked: HashSet<&str> = marked_ids.into_iter().collect();
    let missing_modules: Vec<String> = module_ids
        .into_iter()
        .filter(|id| !marked.contains(id))
        .map(|id| id.to_string())
        .collect();

    MarksValidation {
        is_valid: missing_modules.is_empty(),
        missing_modules,
    }
}

/// `difference` is `required - total`: positive means under-covered.
pub fn validate_total_credits<I>(credits: I, required_credits: i64) -> CreditsValidation
where
    I: IntoIterator<Item = i64>,
{
    let total_credits: i128 = credits.into_iter().map(i128::from).sum();
    let difference = i128::from(required_credits) - total_credits;
    CreditsValidation {
        is_valid: difference == 0,
        total_credits: clamp_to_i64(total_credits),
        difference: clamp_to_i64(difference),
    }
}

pub fn check_mark_ranges(marks: &[WeightedMark]) -> Result<(), RangeError> {
    for (index, m) in marks.iter().enumerate() {
        if !m.mark.is_finite() || !(0.0..=100.0).contains(&m.mark) {
            return Err(RangeError {
                index,
                field: "mark",
                value: m.mark,
            });
        }
        if m.credits < 0 {
            return Err(RangeError {
                index,
                field: "credits",
                value: m.credits as f64,
            });
        }
    }
    Ok(())
}
