use std::sync::Arc;

use sweep_service::{
    DryRunBackend, MatrixGrid, ParamMatrix, PipelineParser, PlanOptions, Scheduler, Sweep, Value,
    Workspace,
};

#[tokio::main]
async fn main() {
    let yaml = r#"
name: demo
nodes:
  - name: train
    executable: python train.py
    fields:
      - name: data
        tags: [in_path]
        default: /data/train.csv
      - name: model
        default: model.pt
        tags: [out_path, primary]
      - name: lr
        default: 0.001
      - name: workers
        default: 4
        tags: [perf]
  - name: evaluate
    executable: python eval.py
    in_paths:
      model:
    out_paths:
      report: report.json
    kind: json_metrics
connections:
  - from: train
    to: evaluate.inputs.model
"#;

    let pipeline = PipelineParser::load_str(yaml).expect("Failed to parse");
    println!("✓ Parsed pipeline with {} nodes", pipeline.len());
    for connection in pipeline.connections() {
        println!("    {}", connection);
    }

    let matrix: ParamMatrix = MatrixGrid::new()
        .axis("train.lr", vec![Value::Float(0.1), Value::Float(0.01)])
        .axis("train.workers", vec![Value::Int(2), Value::Int(8)])
        .into();

    let root = std::env::temp_dir().join("dagsweep-demo");
    let options = PlanOptions::new(Workspace::new(&root)).expect("Failed to resolve workspace");
    let sweep = Sweep::new(pipeline, matrix, options);

    let plan = sweep.plan().expect("Failed to plan");
    // workers is a perf param, so only lr changes the cache key
    println!(
        "✓ {} instances collapse to {} jobs",
        plan.instances().len(),
        plan.len()
    );
    for job in plan.jobs() {
        println!("\n  {}", job.id);
        println!("    $ {}", job.command);
    }

    let backend = Arc::new(DryRunBackend::new());
    let report = Scheduler::default().run(&plan, backend.clone(), None).await;
    println!(
        "\n✓ Dry run dispatched {} jobs, success: {}",
        backend.dispatched().len(),
        report.success()
    );
}
