mod model;
pub mod parser;

pub use model::{
    join_extracted, AnalysisRequest, AnalysisResult, DiagramRequest, DiagramResult,
    ExtractedText, ImageRef, ImplementationComplexity, Recommendation, Solution,
    TechnicalComponents, TextSource,
};
pub use parser::parse_analysis;
