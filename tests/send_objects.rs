#[allow(dead_code)]
fn needs_send<T: Send + ?Sized>() {}

#[test]
fn dispatcher_send() {
    needs_send::<input_dispatch::InputDispatcher>();
}

#[test]
fn channel_send() {
    needs_send::<input_dispatch::channel::InputConsumer>();
    needs_send::<input_dispatch::channel::InputChannel>();
    needs_send::<input_dispatch::channel::InputMessage>();
}

#[test]
fn ids_send() {
    needs_send::<input_dispatch::window::InputToken>();
    needs_send::<input_dispatch::window::DisplayId>();
    needs_send::<input_dispatch::event::DeviceId>();
    needs_send::<input_dispatch::event::PointerId>();
}

#[test]
fn policy_send() {
    needs_send::<dyn input_dispatch::policy::DispatcherPolicy>();
}
