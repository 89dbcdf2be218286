//! Document synthesizer.
//!
//! Renders the identity-document artifact bound to a job: a self-contained
//! SVG parameterized by the subject attributes, with a closed template
//! registry keyed by accent color and gender variant. Rendering is a pure
//! function of its input; the only randomness is cosmetic speckle noise
//! seeded from the job id, so a given job always reproduces the same bytes.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::subject::{AccentColor, GenderVariant, SubjectAttributes};

const CARD_WIDTH: u32 = 640;
const CARD_HEIGHT: u32 = 400;
const SPECKLE_COUNT: usize = 14;

/// Decorrelates the cosmetic-noise stream from the identity stream, which is
/// seeded from the same job id.
const NOISE_STREAM: u64 = 0x5eed_d0c5;

/// Input to one render call.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub job_id: Uuid,
    pub subject: &'a SubjectAttributes,
    pub organization: &'a str,
    pub valid_through: NaiveDate,
    /// Optional supplied portrait; must be a decodable raster image.
    pub photo: Option<&'a [u8]>,
}

/// A rendered identity-document artifact.
#[derive(Debug, Clone)]
pub struct DocumentArtifact {
    pub svg: String,
    pub accent: AccentColor,
    pub variant: GenderVariant,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no template registered for accent '{accent}' with variant '{variant}'")]
    UnsupportedTemplate { accent: String, variant: String },

    #[error("supplied photo is not a decodable image")]
    InvalidPhoto,
}

/// Resolve free-form accent/variant strings against the closed template set.
/// Unknown values fail here; nothing is silently substituted.
pub fn parse_template_key(
    accent: &str,
    variant: &str,
) -> Result<(AccentColor, GenderVariant), DocumentError> {
    let unsupported = || DocumentError::UnsupportedTemplate {
        accent: accent.to_string(),
        variant: variant.to_string(),
    };

    let accent = AccentColor::from_str(accent).map_err(|_| unsupported())?;
    let variant = GenderVariant::from_str(variant).map_err(|_| unsupported())?;
    Ok((accent, variant))
}

/// Placeholder portrait silhouette per gender variant (used when no photo is
/// supplied).
fn silhouette_path(variant: GenderVariant) -> &'static str {
    match variant {
        GenderVariant::Masculine => {
            "M60 34c0 13-9 24-20 24s-20-11-20-24 9-22 20-22 20 9 20 22zM8 96c0-20 14-32 32-32s32 12 32 32v6H8z"
        }
        GenderVariant::Feminine => {
            "M61 36c0 14-9 25-21 25S19 50 19 36c0-16 7-26 21-26s21 10 21 26zM10 96c0-18 13-30 30-30s30 12 30 30v6H10zM22 38c-3 14-6 20-10 24h16zM58 38c3 14 6 20 10 24H52z"
        }
    }
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Validate and embed a supplied portrait as a data URI.
fn embed_photo(bytes: &[u8]) -> Result<String, DocumentError> {
    use base64::Engine;

    let format = image::guess_format(bytes).map_err(|_| DocumentError::InvalidPhoto)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", format.to_mime_type(), encoded))
}

/// Deterministic speckle noise: simulated print/scan artifacts seeded from
/// the job id.
fn speckle_layer(job_id: Uuid) -> String {
    let b = job_id.into_bytes();
    let seed = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) ^ NOISE_STREAM;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut layer = String::new();
    for _ in 0..SPECKLE_COUNT {
        let cx = rng.random_range(0..CARD_WIDTH);
        let cy = rng.random_range(0..CARD_HEIGHT);
        let r = rng.random_range(4..14) as f64 / 10.0;
        let opacity = rng.random_range(2..9) as f64 / 100.0;
        layer.push_str(&format!(
            r##"<circle cx="{cx}" cy="{cy}" r="{r:.1}" fill="#000000" opacity="{opacity:.2}"/>"##,
        ));
    }
    layer
}

/// Pseudo-barcode strip derived from the id number (purely decorative,
/// deterministic).
fn barcode_strip(id_number: &str) -> String {
    let mut strip = String::new();
    let mut x = 24;
    for c in id_number.bytes() {
        let w = 1 + (c as u32 % 4);
        strip.push_str(&format!(
            r##"<rect x="{x}" y="352" width="{w}" height="28" fill="#1a1a1a"/>"##,
        ));
        x += w + 3;
    }
    strip
}

/// Render the identity-document artifact for a job.
///
/// Deterministic: identical input (including job id) produces byte-identical
/// output. The template registry is closed over the enum cross product;
/// boundary input enters through [`parse_template_key`] and fails closed.
pub fn render(request: &RenderRequest<'_>) -> Result<DocumentArtifact, DocumentError> {
    let subject = request.subject;
    let accent = subject.accent;
    let variant = subject.gender;

    let portrait = match request.photo {
        Some(bytes) => format!(
            r#"<image x="36" y="120" width="150" height="190" preserveAspectRatio="xMidYMid slice" href="{}"/>"#,
            embed_photo(bytes)?,
        ),
        None => format!(
            r#"<g transform="translate(68,150) scale(1.1)"><path d="{}" fill="{}" opacity="0.65"/></g>"#,
            silhouette_path(variant),
            accent.hex(),
        ),
    };

    let org = xml_escape(request.organization);
    let name = xml_escape(&subject.full_name());
    let program = xml_escape(&subject.program);

    let svg = format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r##"<rect width="{w}" height="{h}" rx="18" fill="#f6f4ef"/>"##,
            r#"<rect width="{w}" height="84" rx="18" fill="{accent}"/>"#,
            r#"<rect y="66" width="{w}" height="18" fill="{accent}"/>"#,
            r##"<text x="32" y="52" font-family="Georgia, serif" font-size="30" font-weight="bold" fill="#ffffff">{org}</text>"##,
            r##"<rect x="32" y="116" width="158" height="198" rx="8" fill="#e8e4da" stroke="{accent}" stroke-width="2"/>"##,
            "{portrait}",
            r##"<text x="220" y="150" font-family="Helvetica, Arial, sans-serif" font-size="13" fill="#6b6b6b">STUDENT</text>"##,
            r##"<text x="220" y="180" font-family="Helvetica, Arial, sans-serif" font-size="24" font-weight="bold" fill="#1a1a1a">{name}</text>"##,
            r##"<text x="220" y="214" font-family="Helvetica, Arial, sans-serif" font-size="14" fill="#3a3a3a">Date of birth: {dob}</text>"##,
            r##"<text x="220" y="240" font-family="Helvetica, Arial, sans-serif" font-size="14" fill="#3a3a3a">Program: {program}</text>"##,
            r##"<text x="220" y="266" font-family="Helvetica, Arial, sans-serif" font-size="14" fill="#3a3a3a">ID No: {id_number}</text>"##,
            r##"<text x="220" y="292" font-family="Helvetica, Arial, sans-serif" font-size="14" fill="#3a3a3a">Valid through: {valid}</text>"##,
            r#"<rect y="340" width="{w}" height="60" fill="{accent_light}"/>"#,
            "{barcode}",
            r##"<text x="{id_x}" y="372" text-anchor="end" font-family="Courier, monospace" font-size="16" fill="#1a1a1a">{id_number}</text>"##,
            "{speckles}",
            "</svg>",
        ),
        w = CARD_WIDTH,
        h = CARD_HEIGHT,
        accent = accent.hex(),
        accent_light = accent.hex_light(),
        org = org,
        portrait = portrait,
        name = name,
        dob = subject.birth_date.format("%Y-%m-%d"),
        program = program,
        id_number = subject.id_number,
        valid = request.valid_through.format("%Y-%m-%d"),
        barcode = barcode_strip(&subject.id_number),
        id_x = CARD_WIDTH - 24,
        speckles = speckle_layer(request.job_id),
    );

    Ok(DocumentArtifact {
        svg,
        accent,
        variant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> SubjectAttributes {
        SubjectAttributes {
            given_name: "Emma".to_string(),
            family_name: "Walker".to_string(),
            email: "emma.walker42@alphacollege.edu".to_string(),
            birth_date: NaiveDate::from_ymd_opt(2001, 4, 12).unwrap(),
            program: "Biology".to_string(),
            id_number: "48213975".to_string(),
            gender: GenderVariant::Feminine,
            accent: AccentColor::Navy,
        }
    }

    fn request(job_id: Uuid, subject: &SubjectAttributes) -> RenderRequest<'_> {
        RenderRequest {
            job_id,
            subject,
            organization: "Alpha College",
            valid_through: NaiveDate::from_ymd_opt(2027, 6, 30).unwrap(),
            photo: None,
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let job_id = Uuid::new_v4();
        let subject = subject();
        let a = render(&request(job_id, &subject)).unwrap();
        let b = render(&request(job_id, &subject)).unwrap();
        assert_eq!(a.svg, b.svg);
    }

    #[test]
    fn test_noise_differs_across_jobs() {
        let subject = subject();
        let a = render(&request(Uuid::new_v4(), &subject)).unwrap();
        let b = render(&request(Uuid::new_v4(), &subject)).unwrap();
        assert_ne!(a.svg, b.svg);
    }

    #[test]
    fn test_output_is_self_contained() {
        let artifact = render(&request(Uuid::new_v4(), &subject())).unwrap();
        assert!(artifact.svg.starts_with("<svg"));
        assert!(artifact.svg.contains("Alpha College"));
        assert!(artifact.svg.contains("Emma Walker"));
        // No external fetches at render time: without a photo there is no
        // href at all, and a photo embeds as a data URI (tested below).
        assert!(!artifact.svg.contains("href="));
    }

    #[test]
    fn test_unknown_template_fails_closed() {
        let err = parse_template_key("chartreuse", "feminine").unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedTemplate { .. }));

        let err = parse_template_key("navy", "unspecified").unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedTemplate { .. }));

        assert!(parse_template_key("navy", "female").is_ok());
    }

    #[test]
    fn test_invalid_photo_rejected() {
        let subject = subject();
        let mut s = request(Uuid::new_v4(), &subject);
        s.photo = Some(b"definitely not an image");
        assert!(matches!(render(&s), Err(DocumentError::InvalidPhoto)));
    }

    #[test]
    fn test_photo_embeds_as_data_uri() {
        // guess_format reads magic bytes only.
        let png_magic: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];
        let subject = subject();
        let mut s = request(Uuid::new_v4(), &subject);
        s.photo = Some(png_magic);
        let artifact = render(&s).unwrap();
        assert!(artifact.svg.contains(r#"href="data:image/png;base64,"#));
    }

    #[test]
    fn test_escapes_markup_in_names() {
        let mut subject = subject();
        subject.family_name = "O'Brien & Sons".to_string();
        let artifact = render(&request(Uuid::new_v4(), &subject)).unwrap();
        assert!(artifact.svg.contains("O&apos;Brien &amp; Sons"));
    }
}
