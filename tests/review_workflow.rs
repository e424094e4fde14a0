//! Review path: load a collection written by an aggregation pass, select,
//! sum, and compare with the automatic per-wavelength result.

use lasesnap::config::CubeConfig;
use lasesnap::cube::aggregate::Aggregator;
use lasesnap::hardware::mock::SimulatedInstrument;
use lasesnap::naming::Project;
use lasesnap::recipe::{Recipe, RecipeStep};
use lasesnap::review::load_collection;
use lasesnap::snapshot::{diff, FolderSnapshot};

#[test]
fn test_selection_sum_matches_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let watch = dir.path().join("capture");
    let out = dir.path().join("output");
    let config = CubeConfig::default();

    let instrument = SimulatedInstrument::new(&watch, &config).with_shape(4, 4, 32);
    let before = FolderSnapshot::take(&watch).unwrap();
    for _ in 0..4 {
        instrument.capture().unwrap();
    }
    let new = diff(&before, &FolderSnapshot::take(&watch).unwrap());

    let recipe = Recipe::from_steps(vec![RecipeStep::new("500", 3), RecipeStep::new("650", 1)]);
    let aggregator = Aggregator::new(Project::new("leaf", &out).unwrap(), config.clone())
        .unwrap()
        .with_date("11-30");
    let report = aggregator.aggregate(&recipe, &new).unwrap();

    let mut collection = load_collection(&out, &config).unwrap();
    let names: Vec<String> = collection
        .entries()
        .iter()
        .map(|e| format!("{}#{}", e.wavelength, e.shot_index))
        .collect();
    assert_eq!(names, ["500#1", "500#2", "500#3", "650#1"]);

    let at_500: Vec<_> = collection
        .entries()
        .iter()
        .filter(|e| e.wavelength == "500")
        .map(|e| e.handle)
        .collect();
    collection.select(at_500).unwrap();
    let manual = collection.sum_selected().unwrap();
    assert_eq!(manual.data(), report.combined()["500"].data());

    // a single selected cube comes back unchanged
    let last = collection.handle(3).unwrap();
    collection.select([last]).unwrap();
    assert_eq!(
        &collection.sum_selected().unwrap(),
        &collection.get(last).unwrap().cube
    );
}
