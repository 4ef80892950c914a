#[allow(dead_code)]
fn needs_sync<T: Sync + ?Sized>() {}

#[test]
fn dispatcher_sync() {
    needs_sync::<input_dispatch::InputDispatcher>();
}

#[test]
fn consumer_sync() {
    needs_sync::<input_dispatch::channel::InputConsumer>();
}

#[test]
fn policy_sync() {
    needs_sync::<dyn input_dispatch::policy::DispatcherPolicy>();
}
