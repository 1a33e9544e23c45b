//! `planloop roles`: Print the role table.

use planloop_agent::role_table;

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(role_table())?);
        return Ok(());
    }

    for spec in role_table() {
        println!("── {} ──", spec.kind);
        println!("Goal: {}", spec.goal);
        println!();
        println!("{}", spec.instructions);
        println!();
    }
    Ok(())
}
