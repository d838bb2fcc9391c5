pub mod certificates;
pub mod signing;

pub use certificates::{
    CertificateBody, CertificateBuilder, CertificateSignature, ToolInfo, WipeCertificate,
    FORMAT_VERSION,
};
pub use signing::CertificateSigner;
