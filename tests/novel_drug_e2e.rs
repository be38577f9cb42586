use chrono::{Datelike, NaiveDate};

use malasim_strategy::time::days_to_next_n_years;
use malasim_strategy::{
    ChildRef, Clock, Day, InMemoryFeedback, InMemoryTherapyCatalog, PatientSnapshot, Policy,
    ScriptedRandom, SimulationClock, StrategyKind, StrategyParameters, TreatmentEngine,
    UpdateContext,
};

const TOTAL_DAYS: Day = 7300;

/// Public SFT (therapy 0) mixed with a private MFT; strategy 1 is the novel drug.
fn config(public: &str) -> String {
    format!(
        r#"{{
            "initial_strategy_id": 2,
            "settings": {{
                "district_boundary": {{"min_unit_id": 1, "max_unit_id": 1, "unit_count": 1}}
            }},
            "strategy_db": {{
                "0": {public},
                "1": {{"name": "novel", "type": "SFT", "therapy_ids": [1]}},
                "2": {{
                    "name": "public-private", "type": "NovelDrugIntroduction",
                    "strategy_ids": [0, 3],
                    "start_distribution": [0.6, 0.4], "peak_distribution": [0.6, 0.4],
                    "peak_after": 0,
                    "newly_introduced_strategy_id": 1, "tf_threshold": 0.1,
                    "replacement_fraction": 0.5, "replacement_duration": 365
                }},
                "3": {{"name": "private", "type": "MFT", "therapy_ids": [2, 3], "distribution": [0.5, 0.5]}}
            }}
        }}"#
    )
}

const PUBLIC_SFT: &str = r#"{"name": "public", "type": "SFT", "therapy_ids": [0]}"#;

fn engine(public: &str) -> TreatmentEngine {
    let params = StrategyParameters::from_json_str(&config(public)).unwrap();
    TreatmentEngine::from_parameters(&params, &InMemoryTherapyCatalog::with_ids(0..4)).unwrap()
}

fn clock() -> SimulationClock {
    SimulationClock::new(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), TOTAL_DAYS)
}

/// Drive the engine day by day until `until`, like the scheduler does.
///
/// Returns the days on which the registry grew.
fn run(
    engine: &mut TreatmentEngine,
    clock: &mut SimulationClock,
    feedback: &InMemoryFeedback,
    until: Day,
) -> Vec<Day> {
    let mut grown_on = Vec::new();
    while clock.current_day() < until {
        clock.advance();
        if clock.is_first_day_of_month() {
            let before = engine.registry().len();
            engine
                .monthly_update(&mut UpdateContext::new(feedback, &mut *clock))
                .unwrap();
            if engine.registry().len() > before {
                grown_on.push(clock.current_day());
            }
        }
        engine
            .update_end_of_time_step(&mut UpdateContext::new(feedback, &mut *clock))
            .unwrap();
    }
    grown_on
}

#[test]
fn novel_drug_is_introduced_once() {
    let mut engine = engine(PUBLIC_SFT);
    let mut clock = clock();
    let feedback = InMemoryFeedback::new().with_failure_rate(0, 0.15);

    // 1. Nothing happens during warm-up even though the rate is above threshold.
    assert!(run(&mut engine, &mut clock, &feedback, 3000).is_empty());
    assert_eq!(engine.registry().len(), 4);

    // 2. The first monthly update after warm-up switches.
    let grown_on = run(&mut engine, &mut clock, &feedback, 3100);
    assert_eq!(grown_on.len(), 1);
    let switch_day = grown_on[0];
    let switch_date = clock.start_date + chrono::Duration::days(switch_day);
    assert!(switch_day > 3000);
    assert_eq!(switch_date.day(), 1);

    let Policy::NovelDrugIntroduction(novel) = &engine.strategy(2).unwrap().policy else {
        panic!("strategy 2 must be a novel drug introduction");
    };
    assert!(novel.is_switched());
    assert_eq!(novel.switched_on(), Some(switch_day));

    // 3. The public slot now points at a new composite; the old policy survives.
    let slot = novel.public_slot();
    let history = engine.registry().slot_history(slot).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].strategy_id, 0);
    assert_eq!(history[1].strategy_id, 4);
    assert_eq!(history[1].bound_on, Some(switch_day));

    let replacement = engine.strategy(4).unwrap();
    assert_eq!(replacement.kind(), StrategyKind::NestedMft);
    assert_eq!(
        replacement.policy.children(),
        &[ChildRef::Strategy(0), ChildRef::Strategy(1)]
    );
    assert!(engine.strategy(0).is_ok());

    // 4. Clock side effects.
    assert_eq!(clock.start_of_comparison_period(), switch_day);
    assert_eq!(
        clock.total_days(),
        switch_day + 365 + days_to_next_n_years(switch_date, 10)
    );

    // 5. Runs on without switching again, even after a re-anchor.
    engine.adjust_started_time_point(clock.current_day()).unwrap();
    assert!(run(&mut engine, &mut clock, &feedback, 5000).is_empty());
    assert_eq!(engine.registry().len(), 5);
}

#[test]
fn replacement_ramps_towards_novel_drug() {
    let mut engine = engine(PUBLIC_SFT);
    let mut clock = clock();
    let feedback = InMemoryFeedback::new().with_failure_rate(0, 0.5);
    let person = PatientSnapshot::default();

    let switch_day = run(&mut engine, &mut clock, &feedback, 3100)[0];

    // Shortly after the switch the old public policy still dominates.
    let Policy::NestedMft(composite) = &engine.strategy(4).unwrap().policy else {
        panic!("replacement must be a nested MFT");
    };
    assert_eq!(composite.starting_time(), switch_day);
    assert!(composite.distribution().weights()[0] > 0.8);
    let mut rng = ScriptedRandom::new(vec![0.1, 0.5]);
    assert_eq!(engine.select_therapy(&person, &mut rng).unwrap().id(), 0);

    // After the replacement duration the composite is at [0.5, 0.5].
    run(&mut engine, &mut clock, &feedback, switch_day + 400);
    let Policy::NestedMft(composite) = &engine.strategy(4).unwrap().policy else {
        panic!("replacement must be a nested MFT");
    };
    assert_eq!(composite.distribution().weights(), &[0.5, 0.5]);

    let mut rng = ScriptedRandom::new(vec![0.1, 0.9]);
    assert_eq!(engine.select_therapy(&person, &mut rng).unwrap().id(), 1);
    let mut rng = ScriptedRandom::new(vec![0.1, 0.2]);
    assert_eq!(engine.select_therapy(&person, &mut rng).unwrap().id(), 0);

    // The private child is untouched.
    let mut rng = ScriptedRandom::new(vec![0.9, 0.7]);
    assert_eq!(engine.select_therapy(&person, &mut rng).unwrap().id(), 3);
}

#[test]
fn low_failure_rate_only_extends_follow_up() {
    let mut engine = engine(PUBLIC_SFT);
    let mut clock = clock();
    let feedback = InMemoryFeedback::new().with_failure_rate(0, 0.1);

    assert!(run(&mut engine, &mut clock, &feedback, 4000).is_empty());
    assert_eq!(engine.registry().len(), 4);
    assert_eq!(clock.start_of_comparison_period(), 0);

    // Every monthly update keeps ten calendar years ahead of the current day.
    let last_month_start = (1..=clock.current_day())
        .rev()
        .find(|day| (clock.start_date + chrono::Duration::days(*day)).day() == 1)
        .unwrap();
    let date = clock.start_date + chrono::Duration::days(last_month_start);
    assert_eq!(
        clock.total_days(),
        last_month_start + days_to_next_n_years(date, 10)
    );
    assert!(clock.total_days() > TOTAL_DAYS);
}

#[test]
fn district_public_policy_suppresses_trigger() {
    let public = r#"{
        "name": "districts", "type": "DistrictMFT",
        "definitions": [{"therapy_ids": [0], "distribution": [1.0], "district_ids": [1]}]
    }"#;
    let mut engine = engine(public);
    let mut clock = clock();
    let feedback = InMemoryFeedback::new().with_failure_rate(0, 1.0);

    assert!(run(&mut engine, &mut clock, &feedback, 3500).is_empty());
    let Policy::NovelDrugIntroduction(novel) = &engine.strategy(2).unwrap().policy else {
        panic!("strategy 2 must be a novel drug introduction");
    };
    assert!(!novel.is_switched());
}

#[test]
fn location_keyed_public_policy_is_replaced() {
    let json = r#"{
        "initial_strategy_id": 2,
        "settings": {"number_of_locations": 2},
        "strategy_db": {
            "0": {"name": "public-by-location", "type": "NestedMFTMultiLocation",
                  "strategy_ids": [4, 3],
                  "start_distribution": [[1.0, 0.0], [0.2, 0.8]],
                  "peak_distribution": [[1.0, 0.0], [0.2, 0.8]],
                  "peak_after": 0},
            "1": {"name": "novel", "type": "SFT", "therapy_ids": [1]},
            "2": {"name": "public-private", "type": "NovelDrugIntroduction",
                  "strategy_ids": [0, 3],
                  "start_distribution": [0.6, 0.4], "peak_distribution": [0.6, 0.4],
                  "peak_after": 0,
                  "newly_introduced_strategy_id": 1, "tf_threshold": 0.1,
                  "replacement_fraction": 0.5, "replacement_duration": 365},
            "3": {"name": "private", "type": "MFT", "therapy_ids": [2, 3], "distribution": [0.5, 0.5]},
            "4": {"name": "public-first-line", "type": "SFT", "therapy_ids": [0]}
        }
    }"#;
    let params = StrategyParameters::from_json_str(json).unwrap();
    let mut engine =
        TreatmentEngine::from_parameters(&params, &InMemoryTherapyCatalog::with_ids(0..4)).unwrap();
    let mut clock = clock();
    // The dominant public therapy is the first child's: therapy 0.
    let feedback = InMemoryFeedback::new().with_failure_rate(0, 0.3);

    let grown_on = run(&mut engine, &mut clock, &feedback, 3100);
    assert_eq!(grown_on.len(), 1);
    let Policy::NovelDrugIntroduction(novel) = &engine.strategy(2).unwrap().policy else {
        panic!("strategy 2 must be a novel drug introduction");
    };
    assert_eq!(engine.registry().active(novel.public_slot()).unwrap(), 5);
    assert_eq!(
        engine.strategy(5).unwrap().policy.children(),
        &[ChildRef::Strategy(0), ChildRef::Strategy(1)]
    );

    // Both location rows survive behind the composite.
    let at_0 = PatientSnapshot::at_location(0);
    let at_1 = PatientSnapshot::at_location(1);
    let mut rng = ScriptedRandom::new(vec![0.1, 0.1, 0.5]);
    assert_eq!(engine.select_therapy(&at_0, &mut rng).unwrap().id(), 0);
    // Location 1: public sector, old public policy, private child at 0.9, then therapy 2 at 0.1.
    let mut rng = ScriptedRandom::new(vec![0.1, 0.1, 0.9, 0.1]);
    assert_eq!(engine.select_therapy(&at_1, &mut rng).unwrap().id(), 2);
}
