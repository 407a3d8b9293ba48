/// URLs of the vendor cloud relay. Each step of the handshake lives on its
/// own host in production.
#[derive(Debug, Clone)]
pub struct CloudEndpoints {
    pub authenticate: String,
    pub login: String,
    pub negotiate: String,
    pub request_data: String,
    pub retrieve: String,
    pub publish: String,
    pub logout: String,
}

impl Default for CloudEndpoints {
    fn default() -> Self {
        Self::production()
    }
}

impl CloudEndpoints {
    pub fn production() -> Self {
        Self {
            authenticate: "https://ic3messaging.myicomfort.com/v1/mobile/authenticate".into(),
            login: "https://ic3messaging.myicomfort.com/v2/user/login".into(),
            negotiate: "https://icnotificationservice.myicomfort.com/LennoxNotificationServer/negotiate".into(),
            request_data: "https://icrequestdataapi.myicomfort.com/v1/Messages/RequestData".into(),
            retrieve: "https://icretrieveapi.myicomfort.com/v1/messages/retrieve".into(),
            publish: "https://icpublishapi.myicomfort.com/v1/messages/publish".into(),
            logout: "https://ic3messaging.myicomfort.com/v1/user/logout".into(),
        }
    }

    /// All routes on one host, keeping the production paths. Used against
    /// simulators and mock servers.
    pub fn single_host(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authenticate: format!("{base}/v1/mobile/authenticate"),
            login: format!("{base}/v2/user/login"),
            negotiate: format!("{base}/LennoxNotificationServer/negotiate"),
            request_data: format!("{base}/v1/Messages/RequestData"),
            retrieve: format!("{base}/v1/messages/retrieve"),
            publish: format!("{base}/v1/messages/publish"),
            logout: format!("{base}/v1/user/logout"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Route {
    Lan { base_url: String },
    Cloud(CloudEndpoints),
}

impl Route {
    pub fn is_cloud(&self) -> bool {
        matches!(self, Route::Cloud(_))
    }

    pub fn request_data_url(&self) -> String {
        match self {
            Route::Lan { base_url } => format!("{base_url}/Messages/RequestData"),
            Route::Cloud(ep) => ep.request_data.clone(),
        }
    }

    pub fn publish_url(&self) -> String {
        match self {
            Route::Lan { base_url } => format!("{base_url}/Messages/Publish"),
            Route::Cloud(ep) => ep.publish.clone(),
        }
    }

    pub fn retrieve_url(&self, app_id: &str, long_poll_secs: u64) -> String {
        match self {
            Route::Lan { base_url } => format!(
                "{base_url}/Messages/{app_id}/Retrieve?StartTime=1&Direction=Oldest-to-Newest&MessageCount=10&LongPollingTimeout={long_poll_secs}"
            ),
            Route::Cloud(ep) => format!(
                "{}?AppId={app_id}&StartTime=1&Direction=Oldest-to-Newest&MessageCount=10&LongPollingTimeout={long_poll_secs}",
                ep.retrieve
            ),
        }
    }

    pub fn lan_connect_url(base_url: &str, app_id: &str) -> String {
        format!("{base_url}/Endpoints/{app_id}/Connect")
    }

    pub fn lan_disconnect_url(base_url: &str, app_id: &str) -> String {
        format!("{base_url}/Endpoints/{app_id}/Disconnect")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_routes() {
        let route = Route::Lan {
            base_url: "https://10.0.0.5".into(),
        };
        assert_eq!(route.publish_url(), "https://10.0.0.5/Messages/Publish");
        assert!(route
            .retrieve_url("app", 15)
            .starts_with("https://10.0.0.5/Messages/app/Retrieve?"));
        assert!(route.retrieve_url("app", 15).ends_with("LongPollingTimeout=15"));
        assert_eq!(
            Route::lan_connect_url("https://10.0.0.5", "app"),
            "https://10.0.0.5/Endpoints/app/Connect"
        );
    }

    #[test]
    fn single_host_keeps_paths() {
        let ep = CloudEndpoints::single_host("http://127.0.0.1:8080/");
        assert_eq!(ep.login, "http://127.0.0.1:8080/v2/user/login");
        let route = Route::Cloud(ep);
        assert!(route
            .retrieve_url("mapp1", 0)
            .contains("/v1/messages/retrieve?AppId=mapp1&"));
        assert!(route.is_cloud());
    }
}
