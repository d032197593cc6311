//! Interface definitions that ship with the `pipeline` binary.
//!
//! Definitions are embedded JSON documents, loaded through the same schema
//! and invariant checks as user-supplied files.

use anyhow::Result;
use pipeline::io::interface_store::{InterfaceRegistry, parse_interface};
use pipeline::spec::InterfaceSpec;
use tracing::debug;

/// `(relative path, contents)` of every embedded definition.
pub const BUILTIN_SOURCES: &[(&str, &str)] = &[
    (
        "ants/n4_bias_field_correction.json",
        include_str!("../interfaces/ants/n4_bias_field_correction.json"),
    ),
    ("fsl/bet.json", include_str!("../interfaces/fsl/bet.json")),
    ("fsl/flirt.json", include_str!("../interfaces/fsl/flirt.json")),
    (
        "fsl/image_stats.json",
        include_str!("../interfaces/fsl/image_stats.json"),
    ),
    (
        "fsl/isotropic_smooth.json",
        include_str!("../interfaces/fsl/isotropic_smooth.json"),
    ),
    (
        "mrtrix3/mrconvert.json",
        include_str!("../interfaces/mrtrix3/mrconvert.json"),
    ),
];

fn origin(path: &str) -> String {
    format!("builtin:{path}")
}

/// Parse every embedded definition.
pub fn builtin_specs() -> Result<Vec<InterfaceSpec>> {
    BUILTIN_SOURCES
        .iter()
        .map(|(path, contents)| parse_interface(contents, &origin(path)))
        .collect()
}

/// A registry pre-loaded with the built-in definitions.
pub fn registry() -> Result<InterfaceRegistry> {
    let mut registry = InterfaceRegistry::new();
    for (path, contents) in BUILTIN_SOURCES {
        let origin = origin(path);
        registry.insert(parse_interface(contents, &origin)?, &origin)?;
    }
    debug!(count = registry.len(), "loaded built-in interfaces");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::interface::Interface;
    use pipeline::value::Value;
    use std::path::Path;

    fn cmdline(name: &str, inputs: &[(&str, Value)]) -> String {
        let registry = registry().expect("registry");
        let spec = registry.get(name).expect("known interface");
        let mut interface = Interface::new(spec);
        for (field, value) in inputs {
            interface.set(field, value.clone()).expect("set input");
        }
        interface.cmdline(Path::new("/work")).expect("cmdline")
    }

    #[test]
    fn every_builtin_passes_schema_and_invariants() {
        let specs = builtin_specs().expect("builtins");
        assert_eq!(specs.len(), BUILTIN_SOURCES.len());
        let registry = registry().expect("registry");
        assert_eq!(
            registry.names(),
            vec![
                "ants.n4_bias_field_correction",
                "fsl.bet",
                "fsl.flirt",
                "fsl.image_stats",
                "fsl.isotropic_smooth",
                "mrtrix3.mrconvert",
            ]
        );
    }

    #[test]
    fn bet_command_line() {
        assert_eq!(
            cmdline(
                "fsl.bet",
                &[
                    ("in_file", Value::from("/data/t1.nii.gz")),
                    ("frac", Value::Float(0.3)),
                    ("center", Value::from(vec![90, 110, 80])),
                    ("mask", Value::Bool(true)),
                    ("robust", Value::Bool(true)),
                ],
            ),
            "bet /data/t1.nii.gz /work/t1_brain.nii.gz -c 90 110 80 -f 0.30 -m -R"
        );
    }

    #[test]
    fn fslmaths_smoothing_keeps_operand_order() {
        assert_eq!(
            cmdline(
                "fsl.isotropic_smooth",
                &[
                    ("in_file", Value::from("/data/t1.nii.gz")),
                    ("sigma", Value::Float(2.0)),
                    ("output_datatype", Value::from("float")),
                ],
            ),
            "fslmaths /data/t1.nii.gz -s 2.00000 /work/t1_smooth.nii.gz -odt float"
        );
    }

    #[test]
    fn flirt_generates_image_and_matrix_names() {
        assert_eq!(
            cmdline(
                "fsl.flirt",
                &[
                    ("in_file", Value::from("/data/epi.nii.gz")),
                    ("reference", Value::from("/data/t1.nii.gz")),
                    ("dof", Value::Int(6)),
                    ("cost", Value::from("corratio")),
                ],
            ),
            "flirt -in /data/epi.nii.gz -ref /data/t1.nii.gz -out /work/epi_flirt.nii.gz \
             -omat /work/epi_flirt.mat -cost corratio -dof 6"
        );
    }

    #[test]
    fn n4_applies_default_dimension_and_joins_iterations() {
        assert_eq!(
            cmdline(
                "ants.n4_bias_field_correction",
                &[
                    ("input_image", Value::from("/data/t1.nii.gz")),
                    ("n_iterations", Value::from(vec![50, 50, 30, 20])),
                    ("shrink_factor", Value::Int(3)),
                ],
            ),
            "N4BiasFieldCorrection -d 3 --input-image /data/t1.nii.gz \
             --convergence '[50x50x30x20]' --output /work/t1_corrected.nii.gz --shrink-factor 3"
        );
    }

    #[test]
    fn mrconvert_trails_input_and_output() {
        assert_eq!(
            cmdline(
                "mrtrix3.mrconvert",
                &[
                    ("in_file", Value::from("/data/dwi.nii.gz")),
                    ("axes", Value::from(vec![0, 1, 2])),
                    ("coord", Value::from(vec![3, 0])),
                    ("force", Value::Bool(true)),
                ],
            ),
            "mrconvert -axes 0,1,2 -coord 3 0 -force /data/dwi.nii.gz /work/dwi_converted.mif"
        );
    }

    #[test]
    fn image_stats_reads_numbers_from_stdout() {
        let registry = registry().expect("registry");
        let spec = registry.get("fsl.image_stats").expect("fslstats");
        assert_eq!(
            spec.output("out_stat").map(|out| out.kind.label()),
            Some("list")
        );
        assert_eq!(
            cmdline(
                "fsl.image_stats",
                &[
                    ("in_file", Value::from("/data/t1.nii.gz")),
                    ("mask_file", Value::from("/data/mask.nii.gz")),
                    ("mean_nonzero", Value::Bool(true)),
                    ("range", Value::Bool(true)),
                ],
            ),
            "fslstats /data/t1.nii.gz -k /data/mask.nii.gz -M -R"
        );
    }
}
