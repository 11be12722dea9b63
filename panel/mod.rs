pub mod alleles;
pub mod reference;

pub use alleles::{AlleleReconciliation, VcfAlleleIndices, complement, resolve_vcf_alleles};
pub use reference::{
    EXPECTED_PANEL_SNPS, PANEL_FILE_NAME, PanelError, ReferencePanel, ReferenceSnp,
    expected_genetic_distance,
};
