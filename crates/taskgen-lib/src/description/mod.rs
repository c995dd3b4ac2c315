//! Task description language: pest grammar plus one conversion pass into
//! the [`Description`] AST.

mod ast;

pub use ast::*;

use crate::error::{Result, TaskTimeError};
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "description/grammar.pest"]
struct DescriptionParser;

/// Parse `<rundur/ntrial ...> event; event | event` into a [`Description`].
pub fn parse_description(text: &str) -> Result<Description> {
    let mut pairs = DescriptionParser::parse(Rule::description, text)
        .map_err(|err| syntax_error(text, err))?;
    let root = next_child(&mut pairs, "description")?;

    let mut settings = None;
    let mut groups = Vec::new();
    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::settings => settings = Some(convert_settings(pair)?),
            Rule::event_list => groups = convert_event_list(pair)?,
            Rule::EOI => {}
            other => return Err(shape(format!("unexpected {:?} at top level", other))),
        }
    }
    let settings = settings.ok_or_else(|| shape("missing run header"))?;
    validate_settings(&settings)?;
    Ok(Description { settings, groups })
}

fn syntax_error(text: &str, err: pest::error::Error<Rule>) -> TaskTimeError {
    let start = match err.location {
        pest::error::InputLocation::Pos(pos) => pos,
        pest::error::InputLocation::Span((start, _)) => start,
    };
    let fragment: String = text
        .get(start..)
        .unwrap_or("")
        .chars()
        .take(24)
        .collect();
    TaskTimeError::Syntax {
        message: err.variant.message().to_string(),
        fragment,
    }
}

fn shape(msg: impl Into<String>) -> TaskTimeError {
    TaskTimeError::MalformedDescription(msg.into())
}

fn next_child<'a>(pairs: &mut Pairs<'a, Rule>, context: &str) -> Result<Pair<'a, Rule>> {
    pairs
        .next()
        .ok_or_else(|| shape(format!("expected {}", context)))
}

fn number(pair: Pair<'_, Rule>) -> Result<f64> {
    let text = pair.as_str().trim();
    text.parse::<f64>()
        .map_err(|_| shape(format!("'{}' is not a number", text)))
}

/// Numbers are wrapped in single-child rules (`rundur`, `freq`, ...).
fn inner_number(pair: Pair<'_, Rule>) -> Result<f64> {
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();
    number(next_child(&mut inner, &format!("number in {:?}", rule))?)
}

fn convert_settings(pair: Pair<'_, Rule>) -> Result<RunSettings> {
    let mut inner = pair.into_inner();
    let rundur = inner_number(next_child(&mut inner, "run duration")?)?;
    let ntrial_raw = inner_number(next_child(&mut inner, "trial count")?)?;
    if ntrial_raw.fract() != 0.0 {
        return Err(shape(format!("trial count {} is not whole", ntrial_raw)));
    }
    let mut settings = RunSettings::new(rundur, ntrial_raw as usize);

    for opt in inner {
        match opt.as_rule() {
            Rule::tr_opt => settings.tr = Some(inner_number(opt)?),
            Rule::pad_opt => {
                for part in opt.into_inner() {
                    match part.as_rule() {
                        Rule::pad_start => settings.start_pad = inner_number(part)?,
                        Rule::pad_stop => settings.stop_pad = inner_number(part)?,
                        other => return Err(shape(format!("unexpected {:?} in pad", other))),
                    }
                }
            }
            Rule::iti_opt => {
                for part in opt.into_inner() {
                    match part.as_rule() {
                        Rule::iti_min => settings.min_iti = inner_number(part)?,
                        Rule::iti_max => settings.max_iti = Some(inner_number(part)?),
                        Rule::iti_mean => settings.mean_iti = Some(inner_number(part)?),
                        other => return Err(shape(format!("unexpected {:?} in iti", other))),
                    }
                }
            }
            Rule::iti_never_first => settings.iti_never_first = true,
            Rule::stepsize_opt => settings.granularity = inner_number(opt)?,
            Rule::glts => {
                for glt in opt.into_inner() {
                    let mut parts = glt.into_inner();
                    let name = next_child(&mut parts, "glt name")?.as_str().to_string();
                    let formula = next_child(&mut parts, "glt formula")?
                        .as_str()
                        .trim()
                        .to_string();
                    settings.glts.push(Glt { name, formula });
                }
            }
            other => return Err(shape(format!("unexpected {:?} in run header", other))),
        }
    }
    Ok(settings)
}

fn validate_settings(settings: &RunSettings) -> Result<()> {
    if settings.rundur <= 0.0 {
        return Err(shape("run duration must be positive"));
    }
    if settings.ntrial == 0 {
        return Err(shape("trial count must be at least 1"));
    }
    if settings.granularity <= 0.0 {
        return Err(shape("stepsize must be positive"));
    }
    if let Some(max) = settings.max_iti {
        if max < settings.min_iti {
            return Err(shape(format!(
                "max iti {} is below min iti {}",
                max, settings.min_iti
            )));
        }
    }
    Ok(())
}

fn convert_event_list(pair: Pair<'_, Rule>) -> Result<Vec<EventChain>> {
    let mut groups = vec![Vec::new()];
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::event => {
                if let Some(group) = groups.last_mut() {
                    group.push(convert_event(item)?);
                }
            }
            Rule::separator => {
                let starts_group = item.as_str().trim() == "|";
                if starts_group {
                    groups.push(Vec::new());
                }
            }
            other => return Err(shape(format!("unexpected {:?} in event list", other))),
        }
    }
    groups.retain(|group| !group.is_empty());
    if groups.is_empty() {
        return Err(shape("no events"));
    }
    Ok(groups)
}

fn convert_event(pair: Pair<'_, Rule>) -> Result<EventSpec> {
    let mut inner = pair.into_inner();
    let mut event = EventSpec::named(next_child(&mut inner, "event name")?.as_str());
    for part in inner {
        match part.as_rule() {
            Rule::duration => event.duration = Some(convert_duration(part)?),
            Rule::branches => {
                let mut parts = part.into_inner();
                event.branches = Some(convert_branch_expr(next_child(&mut parts, "branches")?)?);
            }
            Rule::catch_ratio => event.catch_ratio = Some(inner_number(part)?),
            Rule::model => {
                let mut parts = part.into_inner();
                event.model = Some(next_child(&mut parts, "model name")?.as_str().to_string());
            }
            Rule::ignore_flags => event.flags = convert_flags(part),
            other => return Err(shape(format!("unexpected {:?} in event", other))),
        }
    }
    Ok(event)
}

fn convert_flags(pair: Pair<'_, Rule>) -> IgnoreFlags {
    let text = pair.as_str();
    IgnoreFlags {
        timing: text.contains('~'),
        model: text.contains('&'),
    }
}

fn convert_dist(pair: Pair<'_, Rule>) -> Result<Distribution> {
    match pair.as_str().trim() {
        "u" => Ok(Distribution::Uniform),
        "e" => Ok(Distribution::Exponential),
        "g" => Ok(Distribution::Geometric),
        other => Err(shape(format!("unknown distribution '{}'", other))),
    }
}

fn convert_duration(pair: Pair<'_, Rule>) -> Result<DurationSpec> {
    let mut inner = pair.into_inner();
    let body = next_child(&mut inner, "duration body")?;
    match body.as_rule() {
        Rule::range_dur => {
            let mut parts = body.into_inner();
            let min = number(next_child(&mut parts, "range minimum")?)?;
            let max = number(next_child(&mut parts, "range maximum")?)?;
            if max < min {
                return Err(shape(format!("range [{}-{}] runs backwards", min, max)));
            }
            let mut step = None;
            let mut dist = None;
            for part in parts {
                match part.as_rule() {
                    Rule::range_step => {
                        let value = inner_number(part)?;
                        if value <= 0.0 {
                            return Err(shape("range step must be positive"));
                        }
                        step = Some(value);
                    }
                    Rule::dist => dist = Some(convert_dist(part)?),
                    other => return Err(shape(format!("unexpected {:?} in range", other))),
                }
            }
            Ok(DurationSpec::Range {
                min,
                max,
                step,
                dist,
            })
        }
        Rule::step_dur => {
            let mut steps = Vec::new();
            let mut dist = None;
            for part in body.into_inner() {
                match part.as_rule() {
                    Rule::step => steps.push(convert_step(part)?),
                    Rule::dist => dist = Some(convert_dist(part)?),
                    other => return Err(shape(format!("unexpected {:?} in steps", other))),
                }
            }
            match (steps.as_slice(), dist) {
                ([only], None) if only.freq.is_none() => Ok(DurationSpec::Fixed(only.value)),
                _ => Ok(DurationSpec::Steps { steps, dist }),
            }
        }
        other => Err(shape(format!("unexpected {:?} in duration", other))),
    }
}

fn convert_step(pair: Pair<'_, Rule>) -> Result<Step> {
    let mut freq = None;
    let mut value = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::freq => {
                let f = inner_number(part)?;
                if f < 1.0 || f.fract() != 0.0 {
                    return Err(shape(format!("duration frequency {} is not a positive integer", f)));
                }
                freq = Some(f as u32);
            }
            Rule::num => value = Some(number(part)?),
            other => return Err(shape(format!("unexpected {:?} in step", other))),
        }
    }
    let value = value.ok_or_else(|| shape("duration step without a value"))?;
    Ok(Step { value, freq })
}

fn convert_branch_expr(pair: Pair<'_, Rule>) -> Result<BranchSpec> {
    let mut factors = Vec::new();
    for term in pair.into_inner() {
        match term.as_rule() {
            // parentheses only group; they add no fan-out of their own
            Rule::group => {
                let mut inner = term.into_inner();
                factors.push(convert_branch_expr(next_child(&mut inner, "grouped branches")?)?);
            }
            Rule::alternatives => factors.push(convert_alternatives(term)?),
            other => return Err(shape(format!("unexpected {:?} in branches", other))),
        }
    }
    match factors.len() {
        0 => Err(shape("empty branch list")),
        1 => Ok(factors.remove(0)),
        _ => Ok(BranchSpec::CrossProduct(factors)),
    }
}

fn convert_alternatives(pair: Pair<'_, Rule>) -> Result<BranchSpec> {
    let mut options = Vec::new();
    let mut flags = IgnoreFlags::default();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::alternative => options.push(convert_alternative(part)?),
            Rule::ignore_flags => flags = convert_flags(part),
            other => return Err(shape(format!("unexpected {:?} in alternatives", other))),
        }
    }
    Ok(BranchSpec::Alternatives { options, flags })
}

fn convert_alternative(pair: Pair<'_, Rule>) -> Result<Alternative> {
    let mut freq = None;
    let mut target = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::freq => {
                let f = inner_number(part)?;
                if f <= 0.0 {
                    return Err(shape("branch weight must be positive"));
                }
                freq = Some(f);
            }
            Rule::label => {
                let mut inner = part.into_inner();
                target = Some(AltTarget::Label(
                    next_child(&mut inner, "branch name")?.as_str().to_string(),
                ));
            }
            Rule::event => {
                let event = convert_event(part)?;
                if event.catch_ratio.is_some() {
                    return Err(shape(format!(
                        "branch '{}' cannot carry its own catch ratio",
                        event.name
                    )));
                }
                target = Some(AltTarget::Event(Box::new(event)));
            }
            other => return Err(shape(format!("unexpected {:?} in alternative", other))),
        }
    }
    let target = target.ok_or_else(|| shape("branch without a name"))?;
    Ok(Alternative { freq, target })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_header() {
        let d = parse_description("<10/1> cue=[2]").unwrap();
        assert_eq!(d.settings.ntrial, 1);
        assert_eq!(d.settings.rundur, 10.0);
        assert_eq!(d.settings.granularity, 0.01);
        assert_eq!(d.groups.len(), 1);
        assert_eq!(d.groups[0][0].name, "cue");
        assert_eq!(d.groups[0][0].duration, Some(DurationSpec::Fixed(2.0)));
    }

    #[test]
    fn parses_header_options() {
        let d = parse_description(
            "<10/1 @1 pad:2+4 iti:2.0-4.0 mu3 stepsize:1 iti_never_first> cue=[2]",
        )
        .unwrap();
        let s = d.settings;
        assert_eq!(s.tr, Some(1.0));
        assert_eq!(s.start_pad, 2.0);
        assert_eq!(s.stop_pad, 4.0);
        assert_eq!(s.min_iti, 2.0);
        assert_eq!(s.max_iti, Some(4.0));
        assert_eq!(s.mean_iti, Some(3.0));
        assert_eq!(s.granularity, 1.0);
        assert!(s.iti_never_first);
        assert_eq!(s.available_duration(), 4.0);
    }

    #[test]
    fn parses_glts_and_models() {
        let d = parse_description(
            "<10/1 glt:sum=cue+resp; glt:diff=resp-cue> cue=[2]@GAM; resp=[1]",
        )
        .unwrap();
        assert_eq!(
            d.settings.glts,
            vec![
                Glt {
                    name: "sum".into(),
                    formula: "cue+resp".into()
                },
                Glt {
                    name: "diff".into(),
                    formula: "resp-cue".into()
                },
            ]
        );
        assert_eq!(d.groups[0][0].model.as_deref(), Some("GAM"));
        assert_eq!(d.groups[0].len(), 2);
    }

    #[test]
    fn parses_duration_shapes() {
        let d = parse_description("<60/6> a=[1.5-5@.5 g]; b=[3x 1, 1x 2]; c=[1, 2, 4 u]; d=[.5]")
            .unwrap();
        let chain = &d.groups[0];
        assert_eq!(
            chain[0].duration,
            Some(DurationSpec::Range {
                min: 1.5,
                max: 5.0,
                step: Some(0.5),
                dist: Some(Distribution::Geometric)
            })
        );
        assert_eq!(
            chain[1].duration,
            Some(DurationSpec::Steps {
                steps: vec![
                    Step {
                        value: 1.0,
                        freq: Some(3)
                    },
                    Step {
                        value: 2.0,
                        freq: Some(1)
                    }
                ],
                dist: None
            })
        );
        match &chain[2].duration {
            Some(DurationSpec::Steps { steps, dist }) => {
                assert_eq!(steps.len(), 3);
                assert_eq!(*dist, Some(Distribution::Uniform));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(chain[3].duration, Some(DurationSpec::Fixed(0.5)));
    }

    #[test]
    fn parses_weighted_cross_product() {
        let d = parse_description("<60/36> cue=[1](A, 2x B, 3x C * X, 2x Y){.2}; end=[0]").unwrap();
        let cue = &d.groups[0][0];
        assert_eq!(cue.catch_ratio, Some(0.2));
        match cue.branches.as_ref().unwrap() {
            BranchSpec::CrossProduct(factors) => {
                assert_eq!(factors.len(), 2);
                match &factors[0] {
                    BranchSpec::Alternatives { options, .. } => {
                        assert_eq!(options.len(), 3);
                        assert_eq!(options[1].freq, Some(2.0));
                        assert_eq!(options[2].target.name(), "C");
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn grouping_parentheses_are_transparent() {
        let flat = parse_description("<60/4> cue=[1](L, R * N, F)").unwrap();
        let grouped = parse_description("<60/4> cue=[1]((L, R) * (N, F))").unwrap();
        assert_eq!(flat.groups, grouped.groups);
    }

    #[test]
    fn parses_nested_events_and_flags() {
        let d = parse_description("<20/1> start=[1.5]; dly=(3x short=[1.5], 2x long=[3]) ~; end=[1.5]")
            .unwrap();
        let dly = &d.groups[0][1];
        assert!(dly.flags.timing);
        assert!(!dly.flags.model);
        match dly.branches.as_ref().unwrap() {
            BranchSpec::Alternatives { options, .. } => match &options[0].target {
                AltTarget::Event(event) => {
                    assert_eq!(event.name, "short");
                    assert_eq!(event.duration, Some(DurationSpec::Fixed(1.5)));
                    assert_eq!(options[0].freq, Some(3.0));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        let d = parse_description("<60/4> cue=[1.5]((Left, Right) * (Near, Far ~)); dly=[2,4,6 g] &")
            .unwrap();
        assert!(d.groups[0][1].flags.model);
    }

    #[test]
    fn pipe_starts_independent_group() {
        let d = parse_description("<20/2> A=[1.5] | B=[1.5]; C=[1]").unwrap();
        assert_eq!(d.groups.len(), 2);
        assert_eq!(d.groups[1].len(), 2);
    }

    #[test]
    fn syntax_error_names_fragment() {
        let err = parse_description("<10/1> cue=[2](A,,B)").unwrap_err();
        match err {
            TaskTimeError::Syntax { fragment, .. } => assert!(fragment.starts_with(",B") || fragment.starts_with(",,")),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn nested_catch_is_malformed() {
        let err = parse_description("<10/1> cue=(a=[1]{.3}, b=[1])").unwrap_err();
        assert!(matches!(err, TaskTimeError::MalformedDescription(_)));
    }

    #[test]
    fn rejects_fractional_trial_count() {
        let err = parse_description("<10/1.5> cue=[1]").unwrap_err();
        assert!(matches!(err, TaskTimeError::MalformedDescription(_)));
    }
}
