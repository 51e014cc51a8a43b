//! Edit-prompt construction.
//!
//! The prompt is the whole contract with the upstream model: besides the image
//! and the output size, nothing else is sent. Output is deterministic for a
//! given `(options, force_grayscale)` pair.

use tracing::debug;

use super::options::RestorationOptions;

const PROMPT_PREFIX: &str = "A perfectly restored, clean version of this photograph with: ";

/// Always requested, in this order.
const BASE_FIXES: &[&str] = &[
    "all tears completely filled in and invisible",
    "all scratches removed",
    "all stains and discoloration removed",
    "all fold lines removed",
    "damaged or missing areas reconstructed seamlessly",
    "smooth, clean background",
];

pub const GRAYSCALE_CLAUSE: &str =
    "converted to high-quality black and white with proper contrast";
pub const DAMAGE_REPAIR_CLAUSE: &str =
    "extra attention to repairing even the smallest physical damage";
pub const COLORIZE_CLAUSE: &str = "vibrant, natural colors restored (no fading or yellowing)";
pub const CLARITY_CLAUSES: &[&str] = &[
    "enhanced clarity and sharpness",
    "improved overall image quality",
];

/// Keeps the model from re-imagining the subject.
const PRESERVATION_CLAUSES: &[&str] = &[
    "The person's face, features, and clothing must remain exactly the same.",
    "The composition and pose must remain unchanged.",
    "Only repair and enhance - do not alter the subject.",
];

/// Build the restoration instruction for one request.
///
/// `force_grayscale` is the server-wide override; when set, the grayscale
/// clause is added and a requested colorization is dropped.
pub fn build_prompt(options: &RestorationOptions, force_grayscale: bool) -> String {
    let mut fixes: Vec<&str> = BASE_FIXES.to_vec();

    if force_grayscale {
        fixes.push(GRAYSCALE_CLAUSE);
    }

    if options.repair_scratches {
        fixes.push(DAMAGE_REPAIR_CLAUSE);
    }

    if options.colorize_photo {
        if force_grayscale {
            debug!("Colorize requested but grayscale is forced, colorize clause omitted");
        } else {
            fixes.push(COLORIZE_CLAUSE);
        }
    }

    if options.improve_clarity {
        fixes.extend_from_slice(CLARITY_CLAUSES);
    }

    let mut prompt = String::with_capacity(768);
    prompt.push_str(PROMPT_PREFIX);
    prompt.push_str(&fixes.join(", "));
    prompt.push_str(". ");
    prompt.push_str(&PRESERVATION_CLAUSES.join(" "));
    prompt
}
