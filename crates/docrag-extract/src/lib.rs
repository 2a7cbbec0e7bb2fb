//! # docrag-extract
//!
//! Extractor adapters for docrag, one per modality, plus a MIME-keyed
//! registry. Each adapter is a thin wrapper over the underlying engine
//! (library, CLI, or provider API) that normalizes output into
//! page-tagged [`docrag_core::PageSegment`]s.
//!
//! | Adapter | Modality | Engine |
//! |---|---|---|
//! | [`TextExtractor`] | plain text / markup | direct read |
//! | [`PdfExtractor`] | PDF | lopdf page walk |
//! | [`OfficeExtractor`] | DOCX | zip + XML strip |
//! | [`ImageExtractor`] | raster images | tesseract CLI |
//! | [`AudioExtractor`] | audio | transcription API |

mod audio;
mod image;
mod office;
mod pdf;
mod registry;
mod text;

pub use audio::AudioExtractor;
pub use image::ImageExtractor;
pub use office::OfficeExtractor;
pub use pdf::PdfExtractor;
pub use registry::ExtractorRegistry;
pub use text::TextExtractor;
