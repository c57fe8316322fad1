// Pipeline processing: parsing, normalization, pseudonymization, and CSV emission

pub mod emit;
pub mod normalize;
pub mod parser;
pub mod pseudonymize;
