//! Instruction templates for the LLM correction requests.
//!
//! The instruction text itself lives in plain files next to the benchmark
//! data (`instructions-raw.txt`, `instructions-image-input.txt`,
//! `instructions-example-output.tsv`) so annotators can edit it without
//! touching code. This module only knows how the pieces are assembled; the
//! French section headings below are part of the prompt contract the
//! correction models were evaluated with.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};

/// Heading introducing the example TSV in text-only prompts.
pub const EXAMPLE_HEADING: &str = "### EXEMPLE DE SORTIE ATTENDUE";

/// Heading introducing the example TSV in image prompts.
pub const IMAGE_EXAMPLE_HEADING: &str = "### EXEMPLE DE FORMAT ATTENDU:";

/// Trailer appended to image prompts: the scan outranks the OCR text.
pub const IMAGE_AUTHORITY_NOTE: &str = "### IMAGE À TRAITER:\n\
Analysez l'image ci-jointe et combinez-la avec le texte OCR fourni.\n\n\
IMPORTANT: En cas de conflit entre l'image et le texte OCR, l'image fait autorité.";

/// Heading for the OCR text in text-only Gemini prompts.
pub const OCR_HEADING: &str = "### TEXTE OCR";

/// Heading for the OCR text in image + text prompts.
pub const SUPPLEMENTARY_OCR_HEADING: &str = "### TEXTE OCR SUPPLÉMENTAIRE";

/// Placeholder when a page has no OCR text.
pub const NO_OCR_TEXT: &str = "(aucun texte OCR fourni)";

/// Which instruction set a request family uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    /// OCR text only.
    Text,
    /// Page image, optionally with OCR text.
    Image,
}

/// Locations of the instruction files.
#[derive(Debug, Clone)]
pub struct InstructionFiles {
    pub raw: PathBuf,
    pub image: PathBuf,
    pub example: PathBuf,
}

impl InstructionFiles {
    /// Conventional file names inside `root`.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw: root.join("instructions-raw.txt"),
            image: root.join("instructions-image-input.txt"),
            example: root.join("instructions-example-output.tsv"),
        }
    }

    /// Read and assemble the instructions for `kind`.
    ///
    /// A missing file is fatal: a batch built without instructions would
    /// waste a whole submission.
    pub fn load(&self, kind: InstructionKind) -> Result<String, PipelineError> {
        let raw_path = match kind {
            InstructionKind::Text => &self.raw,
            InstructionKind::Image => &self.image,
        };
        let raw = read_trimmed(raw_path)?;
        let example = read_trimmed(&self.example)?;
        Ok(assemble_instructions(kind, &raw, &example))
    }
}

fn read_trimmed(path: &Path) -> Result<String, PipelineError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| PipelineError::read(path, e))
}

/// Combine raw instructions and the example output into one prompt string.
pub fn assemble_instructions(kind: InstructionKind, raw: &str, example: &str) -> String {
    match kind {
        InstructionKind::Text => format!("{raw}\n\n{EXAMPLE_HEADING}\n{example}"),
        InstructionKind::Image => {
            format!("{raw}\n\n{IMAGE_EXAMPLE_HEADING}\n{example}\n\n{IMAGE_AUTHORITY_NOTE}")
        }
    }
}

/// Prompt for a text-only Gemini request (instructions and OCR in one part).
pub fn text_prompt(instructions: &str, ocr_text: &str) -> String {
    format!("{instructions}\n\n{OCR_HEADING}\n{ocr_text}")
}

/// Prompt for an image + OCR text request.
pub fn image_text_prompt(instructions: &str, ocr_text: &str) -> String {
    let body = if ocr_text.trim().is_empty() {
        NO_OCR_TEXT
    } else {
        ocr_text
    };
    format!("{instructions}\n\n{SUPPLEMENTARY_OCR_HEADING}\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_instructions_include_example() {
        let s = assemble_instructions(InstructionKind::Text, "Corrigez.", "nom\tannée");
        assert_eq!(s, "Corrigez.\n\n### EXEMPLE DE SORTIE ATTENDUE\nnom\tannée");
    }

    #[test]
    fn image_instructions_end_with_authority_note() {
        let s = assemble_instructions(InstructionKind::Image, "Lisez.", "nom");
        assert!(s.starts_with("Lisez.\n\n### EXEMPLE DE FORMAT ATTENDU:\nnom"));
        assert!(s.ends_with("l'image fait autorité."));
    }

    #[test]
    fn empty_ocr_uses_placeholder() {
        let p = image_text_prompt("I", "   ");
        assert!(p.ends_with(NO_OCR_TEXT));
        let p = image_text_prompt("I", "Dupont");
        assert!(p.ends_with("### TEXTE OCR SUPPLÉMENTAIRE\nDupont"));
    }

    #[test]
    fn missing_instruction_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let files = InstructionFiles::in_dir(dir.path());
        let err = files.load(InstructionKind::Text).unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[test]
    fn load_trims_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("instructions-raw.txt"), "  Corrigez.\n\n").unwrap();
        std::fs::write(dir.path().join("instructions-example-output.tsv"), "nom\n").unwrap();
        let files = InstructionFiles::in_dir(dir.path());
        let s = files.load(InstructionKind::Text).unwrap();
        assert_eq!(s, "Corrigez.\n\n### EXEMPLE DE SORTIE ATTENDUE\nnom");
    }
}
