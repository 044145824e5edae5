/// Greets the user.
///
/// `person_being_greeted` is the name of the person to greet.
#[toolbox::procedure]
pub async fn greeting_action(person_being_greeted: String) -> anyhow::Result<String> {
    tracing::info!("Greeting action called");
    Ok(format!("---- Hello {}! ----", person_being_greeted))
}
