use serde::{Deserialize, Serialize};

/// Per-request enhancement choices made in the mobile app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorationOptions {
    pub repair_scratches: bool,
    pub colorize_photo: bool,
    pub improve_clarity: bool,
}

/// Multipart field names, shared by the handler and the submission client.
pub const REPAIR_SCRATCHES_FIELD: &str = "repairScratches";
pub const COLORIZE_PHOTO_FIELD: &str = "colorizePhoto";
pub const IMPROVE_CLARITY_FIELD: &str = "improveClarity";

/// A form flag is set only by the exact string `"true"`.
pub fn parse_form_flag(value: Option<&str>) -> bool {
    value == Some("true")
}

impl RestorationOptions {
    pub fn from_form_flags(
        repair_scratches: Option<&str>,
        colorize_photo: Option<&str>,
        improve_clarity: Option<&str>,
    ) -> Self {
        Self {
            repair_scratches: parse_form_flag(repair_scratches),
            colorize_photo: parse_form_flag(colorize_photo),
            improve_clarity: parse_form_flag(improve_clarity),
        }
    }

    /// The options as multipart text fields.
    pub fn form_fields(&self) -> [(&'static str, &'static str); 3] {
        let flag = |on: bool| if on { "true" } else { "false" };
        [
            (REPAIR_SCRATCHES_FIELD, flag(self.repair_scratches)),
            (COLORIZE_PHOTO_FIELD, flag(self.colorize_photo)),
            (IMPROVE_CLARITY_FIELD, flag(self.improve_clarity)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_true_sets_a_flag() {
        assert!(parse_form_flag(Some("true")));
        for value in ["True", "TRUE", "1", "yes", "on", " true", "false", ""] {
            assert!(!parse_form_flag(Some(value)), "{value:?}");
        }
        assert!(!parse_form_flag(None));
    }

    #[test]
    fn from_form_flags_maps_each_field() {
        let options = RestorationOptions::from_form_flags(Some("true"), None, Some("false"));
        assert_eq!(
            options,
            RestorationOptions {
                repair_scratches: true,
                colorize_photo: false,
                improve_clarity: false,
            }
        );
    }

    #[test]
    fn form_fields_round_trip_through_parser() {
        let options = RestorationOptions {
            repair_scratches: false,
            colorize_photo: true,
            improve_clarity: true,
        };
        let fields = options.form_fields();
        let lookup = |name: &str| fields.iter().find(|(n, _)| *n == name).map(|(_, v)| *v);
        let parsed = RestorationOptions::from_form_flags(
            lookup(REPAIR_SCRATCHES_FIELD),
            lookup(COLORIZE_PHOTO_FIELD),
            lookup(IMPROVE_CLARITY_FIELD),
        );
        assert_eq!(parsed, options);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RestorationOptions {
            repair_scratches: true,
            colorize_photo: false,
            improve_clarity: true,
        })
        .unwrap();
        assert_eq!(json["repairScratches"], true);
        assert_eq!(json["colorizePhoto"], false);
        assert_eq!(json["improveClarity"], true);
    }
}
