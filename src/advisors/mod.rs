use crate::config::Features;
use crate::models::{
    AdvisorVerdict, FieldDistribution, PatternShape, StringStats, TableSizeInfo, WorkloadProfile,
};

pub mod alex;
pub mod bx_tree;
pub mod cortex;
pub mod fractal_tree;
pub mod idistance;
pub mod pgm;
pub mod rss;

/// Everything an advisor is allowed to see. Advisors are pure scoring
/// functions over this record; probes and the workload analyzer fill it in
/// once per candidate.
#[derive(Debug, Clone, Copy)]
pub struct AdvisorInputs<'a> {
    pub table: &'a str,
    pub fields: &'a [String],
    pub shape: &'a PatternShape,
    pub size: &'a TableSizeInfo,
    pub workload: &'a WorkloadProfile,
    pub distribution: &'a FieldDistribution,
    pub string_stats: Option<&'a StringStats>,
    pub field_types: &'a [String],
}

impl<'a> AdvisorInputs<'a> {
    pub fn field(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }
}

/// Run every enabled single-field advisor. Cortex is pair-based and consulted
/// by the composite detector instead.
pub fn evaluate_all(features: &Features, inputs: &AdvisorInputs) -> Vec<AdvisorVerdict> {
    let mut verdicts = Vec::new();
    if features.pgm_index.enabled {
        verdicts.push(pgm::evaluate(&features.pgm_index, inputs));
    }
    if features.alex.enabled {
        verdicts.push(alex::evaluate(&features.alex, inputs));
    }
    if features.radix_string_spline.enabled {
        verdicts.push(rss::evaluate(&features.radix_string_spline, inputs));
    }
    if features.idistance.enabled {
        verdicts.push(idistance::evaluate(&features.idistance, inputs));
    }
    if features.bx_tree.enabled {
        verdicts.push(bx_tree::evaluate(&features.bx_tree, inputs));
    }
    if features.fractal_tree.enabled {
        verdicts.push(fractal_tree::evaluate(&features.fractal_tree, inputs));
    }
    verdicts
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::models::{DistributionKind, WorkloadKind};

    pub struct InputsOwner {
        pub fields: Vec<String>,
        pub shape: PatternShape,
        pub size: TableSizeInfo,
        pub workload: WorkloadProfile,
        pub distribution: FieldDistribution,
        pub string_stats: Option<StringStats>,
        pub field_types: Vec<String>,
    }

    impl InputsOwner {
        pub fn new(field: &str, field_type: &str) -> Self {
            Self {
                fields: vec![field.to_string()],
                shape: PatternShape {
                    has_exact: true,
                    field_type: field_type.to_string(),
                    ..Default::default()
                },
                size: TableSizeInfo::new(100_000, 50_000_000, 1_000_000),
                workload: WorkloadProfile {
                    read_queries: 900,
                    write_queries: 100,
                    total_queries: 1000,
                    read_ratio: 0.9,
                    write_ratio: 0.1,
                    kind: WorkloadKind::ReadHeavy,
                },
                distribution: FieldDistribution {
                    distinct_count: 90_000,
                    null_count: 0,
                    distribution: DistributionKind::Sequential,
                    is_ordered: true,
                },
                string_stats: None,
                field_types: vec![field_type.to_string()],
            }
        }

        pub fn inputs(&self) -> AdvisorInputs<'_> {
            AdvisorInputs {
                table: "orders",
                fields: &self.fields,
                shape: &self.shape,
                size: &self.size,
                workload: &self.workload,
                distribution: &self.distribution,
                string_stats: self.string_stats.as_ref(),
                field_types: &self.field_types,
            }
        }
    }
}
