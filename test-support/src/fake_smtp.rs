use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{
    net::{IpAddr, TcpListener},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Mutex,
    },
    time::timeout,
};

const SERVER_NAME: &str = "ramxdigital.com";

#[derive(Clone)]
struct SmtpHandler(Vec<u8>, Arc<UnboundedSender<String>>);

impl Handler for SmtpHandler {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        debug!("Got data:\n{}", String::from_utf8_lossy(buf));
        self.0.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let _ = self
            .1
            .send(String::from_utf8_lossy(&std::mem::take(&mut self.0)).into_owned());
        mailin_embedded::response::OK
    }

    fn auth_plain(
        &mut self,
        authorization_id: &str,
        authentication_id: &str,
        password: &str,
    ) -> mailin_embedded::Response {
        debug!("Got authentication data {authorization_id}, {authentication_id}, {password}");
        mailin_embedded::response::AUTH_OK
    }
}

/// An SMTP server on an ephemeral port which hands every received message to the test.
pub struct FakeSmtpServer {
    port: u16,
    receiver: Mutex<UnboundedReceiver<String>>,
}

impl FakeSmtpServer {
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler = SmtpHandler(Vec::new(), Arc::new(sender));
        let port = free_port();
        serve(handler, port);
        Self {
            port,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the next message to arrive, returning its raw content.
    pub async fn next_mail_content(&self) -> Option<String> {
        self.receiver.lock().await.recv().await
    }

    /// Collects every message which arrives within the given time.
    pub async fn mail_received_within(&self, duration: Duration) -> Vec<String> {
        let mut receiver = self.receiver.lock().await;
        let mut mails = Vec::new();
        while let Ok(Some(mail)) = timeout(duration, receiver.recv()).await {
            mails.push(mail);
        }
        mails
    }
}

#[derive(Clone)]
struct PoisonedSmtpHandler;

impl Handler for PoisonedSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts an SMTP server which refuses every message, returning its port.
pub fn start_poisoned_smtp_server() -> u16 {
    let port = free_port();
    serve(PoisonedSmtpHandler, port);
    port
}

fn serve<H: Handler + Clone + Send + 'static>(handler: H, port: u16) {
    let mut server = Server::new(handler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("127.0.0.1:{port}"))
        .unwrap();
    std::thread::spawn(move || {
        let _ = server.serve();
    });
    wait_until_listening(port);
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_until_listening(port: u16) {
    for _ in 0..50 {
        if std::net::TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
