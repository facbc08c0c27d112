use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use stationkeep_ai::blackboard::Blackboard;
use stationkeep_ai::library::TaskLibrary;
use stationkeep_ai::operators::OperatorSpec;
use stationkeep_ai::planner::plan_now;
use stationkeep_ai::tasks::{MethodDef, Precondition, TaskDef};

fn step(name: &str) -> TaskDef {
    TaskDef::primitive(name, vec![], OperatorSpec::Wait { seconds: 1.0 }, vec![])
}

/// One compound decomposing into `steps` primitives in a row
fn flat_domain(steps: usize) -> Arc<TaskLibrary> {
    let names: Vec<String> = (0..steps).map(|i| format!("Step{}", i)).collect();
    let mut defs = vec![TaskDef::compound(
        "Root",
        vec![MethodDef::new(
            vec![],
            names.iter().map(String::as_str).collect(),
        )],
    )];
    defs.extend(names.iter().map(|name| step(name)));
    Arc::new(TaskLibrary::from_defs(defs).unwrap())
}

/// A chain of compounds `depth` deep, each hiding its workable method
/// behind `dead_methods` that decompose into an unsatisfiable task
fn backtracking_domain(depth: usize, dead_methods: usize) -> Arc<TaskLibrary> {
    let mut defs = vec![TaskDef::primitive(
        "Blocked",
        vec![Precondition::KeyExists {
            key: "Never".to_string(),
        }],
        OperatorSpec::Wait { seconds: 1.0 },
        vec![],
    )];

    for level in 0..depth {
        let step_name = format!("Step{}", level);
        defs.push(step(&step_name));

        let mut methods: Vec<MethodDef> = (0..dead_methods)
            .map(|_| MethodDef::new(vec![], vec!["Blocked"]))
            .collect();
        let good: Vec<String> = if level + 1 < depth {
            vec![step_name.clone(), format!("Level{}", level + 1)]
        } else {
            vec![step_name.clone()]
        };
        methods.push(MethodDef::new(
            vec![],
            good.iter().map(String::as_str).collect(),
        ));
        defs.push(TaskDef::compound(&format!("Level{}", level), methods));
    }

    Arc::new(TaskLibrary::from_defs(defs).unwrap())
}

fn bench_flat_plan(c: &mut Criterion) {
    let library = flat_domain(256);
    let blackboard = Blackboard::new();

    c.bench_function("planner.plan(steps=256)", |b| {
        b.iter(|| {
            let plan = plan_now(black_box(&library), "Root", &blackboard).expect("plan");
            black_box(plan.len());
        })
    });
}

fn bench_backtracking_plan(c: &mut Criterion) {
    let library = backtracking_domain(32, 4);
    let blackboard = Blackboard::new();

    c.bench_function("planner.plan(depth=32,dead_methods=4)", |b| {
        b.iter(|| {
            let plan = plan_now(black_box(&library), "Level0", &blackboard).expect("plan");
            black_box(plan.len());
        })
    });
}

criterion_group!(benches, bench_flat_plan, bench_backtracking_plan);
criterion_main!(benches);
