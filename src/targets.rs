use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::match_store::FinalScore;

const ONE_X_TWO: &[&str] = &["home", "draw", "away"];
const YES_NO: &[&str] = &["yes", "no"];
const OVER_UNDER: &[&str] = &["over", "under"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    #[serde(rename = "1x2")]
    OneXTwo,
    Btts,
    OverUnder {
        line: f64,
    },
    Goals,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// Index into `Target::classes()`.
    Class(usize),
    Count(f64),
}

impl Label {
    pub fn class(self) -> Option<usize> {
        match self {
            Label::Class(c) => Some(c),
            Label::Count(_) => None,
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Label::Class(c) => c as f64,
            Label::Count(v) => v,
        }
    }
}

impl Target {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Target::OverUnder { line } = self {
            // half-goal lines only, so a total can never land on the line
            if !line.is_finite() || *line < 0.0 || (line.fract() - 0.5).abs() > 1e-9 {
                return Err(ConfigError::InvalidValue {
                    field: "target.line",
                    reason: format!("{line} is not a half-goal line such as 2.5"),
                });
            }
        }
        Ok(())
    }

    pub fn name(&self) -> String {
        match self {
            Target::OneXTwo => "1x2".to_string(),
            Target::Btts => "btts".to_string(),
            Target::OverUnder { line } => format!("over_under_{line}"),
            Target::Goals => "goals".to_string(),
        }
    }

    /// Class labels in probability order; `None` for the regression target.
    pub fn classes(&self) -> Option<&'static [&'static str]> {
        match self {
            Target::OneXTwo => Some(ONE_X_TWO),
            Target::Btts => Some(YES_NO),
            Target::OverUnder { .. } => Some(OVER_UNDER),
            Target::Goals => None,
        }
    }

    pub fn is_classification(&self) -> bool {
        self.classes().is_some()
    }

    pub fn label(&self, score: &FinalScore) -> Label {
        match self {
            Target::OneXTwo => Label::Class(if score.home_goals > score.away_goals {
                0
            } else if score.home_goals == score.away_goals {
                1
            } else {
                2
            }),
            Target::Btts => Label::Class(if score.home_goals > 0 && score.away_goals > 0 {
                0
            } else {
                1
            }),
            Target::OverUnder { line } => {
                Label::Class(if score.total_goals() as f64 > *line { 0 } else { 1 })
            }
            Target::Goals => Label::Count(score.total_goals() as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Label, Target};
    use crate::match_store::FinalScore;

    fn score(h: u8, a: u8) -> FinalScore {
        FinalScore {
            home_goals: h,
            away_goals: a,
        }
    }

    #[test]
    fn labels_follow_class_order() {
        assert_eq!(Target::OneXTwo.label(&score(2, 1)), Label::Class(0));
        assert_eq!(Target::OneXTwo.label(&score(1, 1)), Label::Class(1));
        assert_eq!(Target::OneXTwo.label(&score(0, 3)), Label::Class(2));
        assert_eq!(Target::Btts.label(&score(1, 1)), Label::Class(0));
        assert_eq!(Target::Btts.label(&score(3, 0)), Label::Class(1));
        let ou = Target::OverUnder { line: 2.5 };
        assert_eq!(ou.label(&score(2, 1)), Label::Class(0));
        assert_eq!(ou.label(&score(1, 1)), Label::Class(1));
        assert_eq!(Target::Goals.label(&score(2, 2)), Label::Count(4.0));
    }

    #[test]
    fn whole_goal_lines_are_rejected() {
        assert!(Target::OverUnder { line: 2.0 }.validate().is_err());
        assert!(Target::OverUnder { line: -0.5 }.validate().is_err());
        assert!(Target::OverUnder { line: 3.5 }.validate().is_ok());
    }

    #[test]
    fn toml_shape() {
        let t: Target = toml::from_str("kind = \"over_under\"\nline = 2.5").unwrap();
        assert_eq!(t, Target::OverUnder { line: 2.5 });
        let t: Target = toml::from_str("kind = \"1x2\"").unwrap();
        assert_eq!(t, Target::OneXTwo);
        assert_eq!(t.classes().map(|c| c.len()), Some(3));
    }
}
