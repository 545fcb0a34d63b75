use crate::cli::CheckArgs;
use crate::config::FileConfig;
use crate::error::Result;
use riboflow::tools::infernal::InfernalTool;
use riboflow::tools::rnadvisor::RnadvisorTool;
use riboflow::tools::rnafold::RnafoldTool;
use riboflow::tools::{KNOWN_BACKENDS, backend_for};

/// Prints an availability table for every external tool the pipeline can
/// drive, based on the given configuration.
pub async fn run(args: CheckArgs) -> Result<()> {
    let file_config = FileConfig::load(args.config.as_deref())?;
    let tools = file_config.tools_config();

    let mut rows: Vec<(String, bool, &str)> = vec![
        (
            "Infernal (cmscan)".into(),
            InfernalTool::new(tools.infernal.clone()).check(),
            "Rfam search + MSA",
        ),
        (
            "ViennaRNA (RNAfold)".into(),
            RnafoldTool::new(tools.rnafold.clone()).check(),
            "Secondary structure",
        ),
    ];
    for name in KNOWN_BACKENDS {
        let backend = backend_for(name, &tools)
            .expect("registry covers every known backend");
        let notes = match *name {
            "rhofold" => "DL 3D prediction (batch-capable)",
            "simrna" => "Physics-based 3D prediction",
            "protenix" => "AF3-class 3D prediction (batch-capable)",
            _ => "",
        };
        rows.push((format!("{name}"), backend.check(), notes));
    }
    rows.push((
        "RNAdvisor".into(),
        RnadvisorTool::new(tools.rnadvisor.clone()).check(),
        "Model scoring",
    ));

    println!("\nriboflow — tool availability\n");
    println!("{:<24} {:<12} {}", "Tool", "Status", "Notes");
    println!("{:-<24} {:-<12} {:-<32}", "", "", "");
    for (name, available, notes) in rows {
        let status = if available { "OK" } else { "NOT FOUND" };
        println!("{name:<24} {status:<12} {notes}");
    }
    println!();
    Ok(())
}
