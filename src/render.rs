use crate::controller::{CareOutcome, ChatTurn, EvolutionTransaction, Phase};
use crate::model::{CareItem, Category, Environment, Pet, ACCESSORIES};
use crate::progression::xp_threshold;
use crossterm::style::{Color, Stylize};
use std::fmt::Write as _;

pub(crate) fn bar(value01: f64, width: usize) -> String {
    let v = value01.clamp(0.0, 1.0);
    let fill = (v * width as f64 + 0.5) as usize;
    let mut s = String::new();
    s.push('[');
    for i in 0..width {
        s.push(if i < fill { '█' } else { ' ' });
    }
    s.push(']');
    s
}

fn meter_color(value: f64) -> Color {
    if value < 25.0 {
        Color::Red
    } else if value < 60.0 {
        Color::Yellow
    } else {
        Color::Green
    }
}

pub(crate) fn status(pet: &Pet, can_evolve: bool, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}  |  {} {} ({})  |  {}",
        pet.name, pet.stage, pet.species, pet.personality, pet.environment
    );

    let m = pet.stats;
    for (name, val) in [("Hunger", m.hunger), ("Happy ", m.happiness), ("Energy", m.energy)] {
        let b = bar(val / 100.0, 14);
        let b = if color { b.with(meter_color(val)).to_string() } else { b };
        let _ = writeln!(out, "  {name}: {b} {val:>5.1}");
    }

    let goal = xp_threshold(pet.stage);
    if pet.stage.is_terminal() {
        let _ = writeln!(out, "  XP    : {} (final stage)", pet.xp);
    } else {
        let b = bar(f64::from(pet.xp) / f64::from(goal), 14);
        let _ = writeln!(out, "  XP    : {b} {}/{goal}", pet.xp);
    }

    let worn = pet.selected_accessories.as_slice();
    let _ = writeln!(
        out,
        "  Wearing: {}",
        if worn.is_empty() { "nothing".to_string() } else { worn.join(", ") }
    );
    if can_evolve {
        let msg = "  Ready to evolve! Type `evolve`.";
        let _ = writeln!(out, "{}", if color { msg.bold().to_string() } else { msg.to_string() });
    }
    out.trim_end().to_string()
}

pub(crate) fn catalog(category: Category, items: &[CareItem]) -> String {
    let mut out = format!("{category}:");
    for item in items {
        let tag = if item.is_minigame { " (minigame)" } else { "" };
        let _ = write!(out, "\n  {} {}{tag}", item.icon, item.name);
    }
    out
}

pub(crate) fn care(outcome: &CareOutcome) -> String {
    match outcome {
        CareOutcome::Applied { item, stats, xp } => {
            let verb = match item.category {
                Category::Food => "Nourishing!",
                Category::Play => "Active!",
                Category::Rest => "Peaceful...",
            };
            format!(
                "{} {verb}  hunger {:.1} | happy {:.1} | energy {:.1} | xp {xp}",
                item.icon, stats.hunger, stats.happiness, stats.energy
            )
        }
        CareOutcome::MinigameStarted { item, .. } => format!(
            "{} {} started. Type `finish <score>` when done (or `finish` to skip scoring).",
            item.icon, item.name
        ),
    }
}

pub(crate) fn chat(pet_name: &str, turn: &ChatTurn) -> String {
    let mut out = match &turn.reply {
        Some(reply) => format!("{pet_name}: {reply}"),
        None => format!("{pet_name} is quiet..."),
    };
    if let Some(item) = turn.learned() {
        let _ = write!(out, "\n  New {} learned: {} {}", item.category, item.icon, item.name);
    }
    out
}

pub(crate) fn evolution(pet_name: &str, tx: &EvolutionTransaction) -> String {
    match &tx.target {
        Some(target) => format!(
            "{pet_name} is becoming {} {}: {}",
            target.stage, target.species, target.personality
        ),
        None => format!("{pet_name} is evolving into {}...", tx.target_stage),
    }
}

pub(crate) fn phase_hint(phase: Phase) -> &'static str {
    match phase {
        Phase::Uninitialized => "No pet yet. Type `new <description>` to summon one.",
        Phase::Creating => "Your companion is taking shape...",
        Phase::Active => "Type `help` for commands.",
        Phase::Evolving => "Evolution in progress...",
    }
}

pub(crate) fn help() -> String {
    let envs: Vec<_> = Environment::ALL.iter().map(|e| e.id()).collect();
    format!(
        "Commands:\n\
  new [--image <path>] <description>   summon a pet\n\
  status                               show stats\n\
  catalog [food|play|rest]             list care items\n\
  care <item>                          use any care item\n\
  feed|play|rest <item>                same, checked against the category\n\
  finish [score]                       end the running minigame\n\
  say <message>                        chat (your pet learns new activities)\n\
  wear <accessory>                     toggle an accessory (max 2)\n\
  travel <{}>\n\
  evolve                               evolve when ready\n\
  release yes                          let your pet go\n\
  quit\n\
Accessories: {}",
        envs.join("|"),
        ACCESSORIES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_rounds_to_nearest_cell() {
        assert_eq!(bar(0.5, 4), "[██  ]");
        assert_eq!(bar(2.0, 2), "[██]");
        assert_eq!(bar(-1.0, 2), "[  ]");
    }
}
