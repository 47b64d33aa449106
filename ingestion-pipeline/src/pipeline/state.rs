use state_machines::state_machine;

state_machine! {
    name: RetrievalMachine,
    state: RetrievalState,
    initial: Pending,
    states: [Pending, Fetching, Parsing, Persisted, Done],
    events {
        skip { transition: { from: Pending, to: Done } }
        fetch { transition: { from: Pending, to: Fetching } }
        parse { transition: { from: Fetching, to: Parsing } }
        persist { transition: { from: Parsing, to: Persisted } }
        finish { transition: { from: Persisted, to: Done } }
    }
}

pub fn pending() -> RetrievalMachine<(), Pending> {
    RetrievalMachine::new(())
}
