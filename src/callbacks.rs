use serde_json::Value;

/// Something the application gets told about, delivered synchronously from
/// `tick()`.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Message(Value),
    ConnectionStatus(bool),
}

pub type MessageCallback = Box<dyn FnMut(&Value)>;
pub type ConnectionStatusCallback = Box<dyn FnMut(bool)>;

/// At most one callback of each kind; the last registration wins. Events with
/// no registered callback are dropped, never buffered.
#[derive(Default)]
pub struct Callbacks {
    on_message: Option<MessageCallback>,
    on_connection_status: Option<ConnectionStatusCallback>,
}

impl Callbacks {
    pub fn set_message_callback(&mut self, callback: impl FnMut(&Value) + 'static) {
        self.on_message = Some(Box::new(callback));
    }

    pub fn set_connection_status_callback(&mut self, callback: impl FnMut(bool) + 'static) {
        self.on_connection_status = Some(Box::new(callback));
    }

    pub fn dispatch(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Message(value) => {
                if let Some(callback) = self.on_message.as_mut() {
                    callback(&value);
                }
            }
            LinkEvent::ConnectionStatus(connected) => {
                if let Some(callback) = self.on_connection_status.as_mut() {
                    callback(connected);
                }
            }
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.on_message.is_some())
            .field("on_connection_status", &self.on_connection_status.is_some())
            .finish()
    }
}
