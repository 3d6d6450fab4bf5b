//! Carried-variable analysis
//!
//! Decides, for every conversion unit of a function, which variables are
//! threaded through the primitive as carried state, which are temporaries
//! local to a branch or iteration, and which are read afterwards without a
//! definite assignment (a hard error).
//!
//! The analysis runs two passes over the whole converted tree: backward
//! liveness and forward definite assignment (see [`dataflow`]). Per-unit
//! results are then combined in [`block_facts`].

pub mod dataflow;
pub mod usedef;

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use crate::error::{AnalysisError, AnalysisErrorKind};
use crate::ir::Param;
use crate::unit::{visit_units_mut, CarriedVariable, ConvertedStmt, UnitId};

use self::dataflow::{define_block, live_in_block, DefiniteFacts, LiveFacts, NameSet};
use self::usedef::modified_by;

/// Analysis result for one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockFacts {
    /// Assigned somewhere in the block, in first-assignment order
    pub modified: IndexSet<String>,
    pub carried: Vec<CarriedVariable>,
    pub temporaries: Vec<String>,
    /// Carried names without a definite assignment, with the reason
    pub invalid: Vec<(String, String)>,
}

/// Analysis result for a whole function
#[derive(Debug, Default)]
pub struct Analysis {
    pub facts: HashMap<UnitId, BlockFacts>,
    /// One error per invalid variable, first occurrence in source order
    pub errors: Vec<AnalysisError>,
}

impl Analysis {
    /// Copy carried variables and temporaries onto the units
    pub fn annotate(&self, body: &mut [ConvertedStmt]) {
        visit_units_mut(body, &mut |unit| {
            if let Some(facts) = self.facts.get(&unit.id) {
                unit.carried = facts.carried.clone();
                unit.temporaries = facts.temporaries.clone();
            }
        });
    }
}

/// Analyze every unit of a lowered function body.
pub fn analyze(params: &[Param], body: &[ConvertedStmt]) -> Analysis {
    let mut live = HashMap::new();
    live_in_block(body, &NameSet::new(), &mut live);

    let mut defined: NameSet = params.iter().map(|p| p.name.clone()).collect();
    let mut definite = HashMap::new();
    define_block(body, &mut defined, &mut definite);

    let mut analysis = Analysis::default();
    let mut reported = HashSet::new();
    collect(body, &live, &definite, &mut analysis, &mut reported);
    analysis
}

fn collect(
    stmts: &[ConvertedStmt],
    live: &HashMap<UnitId, LiveFacts>,
    definite: &HashMap<UnitId, DefiniteFacts>,
    analysis: &mut Analysis,
    reported: &mut HashSet<String>,
) {
    for stmt in stmts {
        let Some(unit) = stmt.unit() else {
            continue;
        };
        let empty_live = LiveFacts::default();
        let empty_def = DefiniteFacts::default();
        let facts = block_facts(
            stmt,
            live.get(&unit.id).unwrap_or(&empty_live),
            definite.get(&unit.id).unwrap_or(&empty_def),
        );

        for (name, reason) in &facts.invalid {
            if reported.insert(name.clone()) {
                analysis.errors.push(AnalysisError::new(
                    AnalysisErrorKind::Uninitialized {
                        name: name.clone(),
                        reason: reason.clone(),
                    },
                    unit.kind,
                    unit.location.clone(),
                ));
            }
        }
        tracing::debug!(
            unit = %unit.id,
            block = %unit.kind,
            carried = ?facts.carried.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            temporaries = ?facts.temporaries,
            "analyzed block"
        );
        analysis.facts.insert(unit.id, facts);

        for child in stmt.children() {
            collect(child, live, definite, analysis, reported);
        }
    }
}

/// Combine the dataflow facts of one unit.
pub fn block_facts(stmt: &ConvertedStmt, live: &LiveFacts, definite: &DefiniteFacts) -> BlockFacts {
    let modified = modified_by(stmt);
    let is_loop = !matches!(stmt, ConvertedStmt::Cond(_));
    let live_in_any = |name: &str| live.live_in.iter().any(|set| set.contains(name));

    let mut facts = BlockFacts {
        modified: modified.clone(),
        ..BlockFacts::default()
    };

    for name in &modified {
        let read_after = live.live_after.contains(name);
        // Loops also carry what the next iteration reads
        let is_carried = read_after || (is_loop && live_in_any(name));
        if !is_carried {
            facts.temporaries.push(name.clone());
            continue;
        }

        let declared_before = definite.before.contains(name);
        let mut var = CarriedVariable::new(name);
        var.declared_before = declared_before;

        if is_loop {
            var.observed = true;
            if !declared_before {
                let reason = if live_in_any(name) {
                    "it is read in the loop body before its first assignment"
                } else {
                    "it is not assigned when the loop runs zero times"
                };
                facts.invalid.push((name.clone(), reason.to_string()));
            }
        } else {
            var.observed = declared_before && live_in_any(name);
            // Branches that always raise impose nothing
            let assigned_everywhere = definite
                .branches
                .iter()
                .flatten()
                .all(|defined| defined.contains(name));
            if !declared_before && !assigned_everywhere {
                facts.invalid.push((
                    name.clone(),
                    "it is not assigned on every branch of the if statement".to_string(),
                ));
            }
        }
        facts.carried.push(var);
    }
    facts
}
